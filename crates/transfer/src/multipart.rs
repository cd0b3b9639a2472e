//! Multipart session state: part planning, the shared ETag ledger and the
//! session handle whose terminal calls consume it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cloudsh_protocol::{
    AbortMultipartRequest, BatchSignRequest, CompleteMultipartRequest, CompletedPart,
    CreateMultipartRequest,
};

use crate::TransferError;
use crate::api::{MetadataClient, OP_BATCH_SIGN, OP_MULTIPART_COMPLETE};

/// One contiguous byte range of the source, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartSlot {
    pub number: u32,
    pub offset: u64,
    pub len: u64,
}

/// Splits `size` bytes into `ceil(size / part_size)` slots.
pub(crate) fn plan_parts(size: u64, part_size: u64) -> Result<Vec<PartSlot>, TransferError> {
    if part_size == 0 {
        return Err(TransferError::InvalidSource("part size must be positive".into()));
    }
    let count = size.div_ceil(part_size);
    if count > u64::from(u32::MAX) {
        return Err(TransferError::InvalidSource(format!(
            "{size} bytes needs {count} parts"
        )));
    }
    Ok((0..count)
        .map(|i| {
            let offset = i * part_size;
            PartSlot {
                number: i as u32 + 1,
                offset,
                len: part_size.min(size - offset),
            }
        })
        .collect())
}

struct PartLedger {
    etags: BTreeMap<u32, String>,
    bytes_done: u64,
}

/// Results shared by the concurrent part uploads of one session.
///
/// The ETag map and the byte counter sit behind one lock, held only for the
/// update itself.
pub(crate) struct PartCollector {
    inner: Mutex<PartLedger>,
}

impl PartCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PartLedger {
                etags: BTreeMap::new(),
                bytes_done: 0,
            }),
        }
    }

    /// Stores the ETag of a finished part and returns the bytes finished so
    /// far across all parts.
    pub fn record(&self, number: u32, etag: String, bytes: u64) -> u64 {
        let mut ledger = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ledger.etags.insert(number, etag);
        ledger.bytes_done += bytes;
        ledger.bytes_done
    }

    /// Returns the parts in ascending order, checking that exactly parts
    /// `1..=expected` are present.
    pub fn into_parts(self, expected: u32) -> Result<Vec<CompletedPart>, TransferError> {
        let ledger = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        let numbers_ok = ledger.etags.len() == expected as usize
            && ledger.etags.keys().copied().eq(1..=expected);
        if !numbers_ok {
            let missing: Vec<u32> = (1..=expected)
                .filter(|n| !ledger.etags.contains_key(n))
                .collect();
            return Err(TransferError::Protocol {
                op: OP_MULTIPART_COMPLETE,
                message: format!("missing ETags for parts {missing:?}"),
            });
        }
        Ok(ledger
            .etags
            .into_iter()
            .map(|(part_number, etag)| CompletedPart { etag, part_number })
            .collect())
    }
}

/// An open multipart session.
///
/// [`complete`](Self::complete) and [`abort`](Self::abort) take `self`, so a
/// session reaches at most one terminal state.
#[derive(Debug)]
pub(crate) struct MultipartSession<'a> {
    api: &'a MetadataClient,
    key: String,
    upload_id: String,
}

impl<'a> MultipartSession<'a> {
    pub async fn open(
        api: &'a MetadataClient,
        req: &CreateMultipartRequest,
        cancel: &CancellationToken,
    ) -> Result<Self, TransferError> {
        let resp = api.create_multipart(req, cancel).await?;
        info!(upload_id = %resp.upload_id, key = %resp.key, "multipart session opened");
        Ok(Self {
            api,
            key: resp.key,
            upload_id: resp.upload_id,
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Signs URLs for exactly `numbers`, failing if the service leaves any
    /// of them out.
    pub async fn sign(
        &self,
        numbers: &[u32],
        cancel: &CancellationToken,
    ) -> Result<HashMap<u32, String>, TransferError> {
        let req = BatchSignRequest {
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
            part_numbers: numbers.to_vec(),
        };
        let resp = self.api.batch_sign(&req, cancel).await?;
        let urls: HashMap<u32, String> = resp
            .urls
            .into_iter()
            .map(|signed| (signed.part_number, signed.url))
            .collect();

        if let Some(missing) = numbers.iter().find(|n| !urls.contains_key(*n)) {
            return Err(TransferError::Protocol {
                op: OP_BATCH_SIGN,
                message: format!("no signed URL for part {missing}"),
            });
        }
        debug!(upload_id = %self.upload_id, parts = numbers.len(), "batch signed");
        Ok(urls)
    }

    pub async fn complete(
        self,
        parts: Vec<CompletedPart>,
        cancel: &CancellationToken,
    ) -> Result<String, TransferError> {
        let count = parts.len();
        let req = CompleteMultipartRequest {
            key: self.key,
            upload_id: self.upload_id,
            parts,
        };
        self.api.complete_multipart(&req, cancel).await?;
        info!(upload_id = %req.upload_id, parts = count, "multipart session completed");
        Ok(req.key)
    }

    pub async fn abort(self, cancel: &CancellationToken) -> Result<(), TransferError> {
        let req = AbortMultipartRequest {
            key: self.key,
            upload_id: self.upload_id,
        };
        self.api.abort_multipart(&req, cancel).await?;
        info!(upload_id = %req.upload_id, "multipart session aborted");
        Ok(())
    }
}
