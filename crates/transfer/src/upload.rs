//! Upload orchestration: routing, the single-shot handshake and the
//! batched multipart path.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::join_all;
use reqwest::header::{ETAG, HeaderName, HeaderValue};
use reqwest::{Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cloudsh_protocol::constants::VAULT_MIME;
use cloudsh_protocol::{CreateMultipartRequest, PresignRequest, RegisterEntryRequest};

use crate::TransferError;
use crate::api::MetadataClient;
use crate::executor::{RequestExecutor, RequestSpec, api_error};
use crate::multipart::{MultipartSession, PartCollector, PartSlot, plan_parts};
use crate::progress::{ProgressCallback, notify};
use crate::sniff::{SNIFF_LEN, detect_mime, extension_of};
use crate::source::{ByteSource, ReadAt, buffer_sequential, read_range, source_size};
use crate::types::{Scope, TransferConfig, TransferRequest, UploadMode, UploadOutcome};

const OP_STORAGE_PUT: &str = "storage put";
const OP_PART_UPLOAD: &str = "part upload";
const X_AMZ_ACL: &str = "x-amz-acl";

/// Everything except the bytes, shared by both upload paths.
struct UploadTarget<'a> {
    name: &'a str,
    parent_id: Option<i64>,
    scope: &'a Scope,
    progress: Option<&'a ProgressCallback>,
}

/// A multipart run that stopped before completion.
struct PartsFailure {
    failed: Vec<u32>,
    source: TransferError,
}

/// Drives uploads against the metadata service and the storage backend.
///
/// Metadata calls use the client's executor; storage PUTs use a copy of it
/// under [`TransferConfig::storage_retry`].
pub struct UploadOrchestrator {
    api: MetadataClient,
    storage: RequestExecutor,
    config: TransferConfig,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
    pub fn new(api: MetadataClient, config: TransferConfig) -> Self {
        Self::with_cancel(api, config, CancellationToken::new())
    }

    pub fn with_cancel(api: MetadataClient, config: TransferConfig, cancel: CancellationToken) -> Self {
        let storage = api.executor().with_policy(config.storage_retry);
        Self {
            api,
            storage,
            config,
            cancel,
        }
    }

    /// Returns a token that aborts in-flight and future uploads.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Uploads one payload and registers it as a file entry.
    ///
    /// The route is fixed before the first request: random-access sources
    /// above the multipart threshold go multipart, everything else is sent
    /// in one PUT. Vault uploads are always single-shot.
    pub async fn upload(&self, request: TransferRequest) -> Result<UploadOutcome, TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let TransferRequest {
            source,
            name,
            size,
            parent_id,
            scope,
            progress,
        } = request;
        let target = UploadTarget {
            name: &name,
            parent_id,
            scope: &scope,
            progress: progress.as_ref(),
        };
        let vault = scope.is_vault();

        match source {
            ByteSource::RandomAccess(reader) => {
                let actual = source_size(&reader).await?;
                if let Some(declared) = size
                    && declared != actual
                {
                    return Err(TransferError::InvalidSource(format!(
                        "declared {declared} bytes but the source holds {actual}"
                    )));
                }
                let size = actual;

                if !vault && size > self.config.multipart_threshold {
                    return self.upload_multipart(&reader, size, &target).await;
                }

                let len = usize::try_from(size).map_err(|_| {
                    TransferError::InvalidSource(format!("{size} bytes do not fit in memory"))
                })?;
                let data = read_range(&reader, 0, len).await?;
                let mime = if vault {
                    VAULT_MIME.to_string()
                } else {
                    detect_mime(&data[..len.min(SNIFF_LEN)], &name)
                };
                self.upload_single(data, mime, &target).await
            }
            ByteSource::Sequential(reader) => {
                if let Some(size) = size
                    && !vault
                    && size > self.config.multipart_threshold
                {
                    return Err(TransferError::InvalidSource(format!(
                        "a {size}-byte upload needs multipart, which requires a random-access source"
                    )));
                }

                let (sniffed, data) = buffer_sequential(reader, name.clone()).await?;
                if let Some(size) = size
                    && size != data.len() as u64
                {
                    return Err(TransferError::InvalidSource(format!(
                        "declared {size} bytes but the stream held {}",
                        data.len()
                    )));
                }
                let mime = if vault { VAULT_MIME.to_string() } else { sniffed };
                self.upload_single(data, mime, &target).await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Single-shot
    // -----------------------------------------------------------------------

    async fn upload_single(
        &self,
        data: Bytes,
        mime: String,
        target: &UploadTarget<'_>,
    ) -> Result<UploadOutcome, TransferError> {
        let size = data.len() as u64;
        info!(name = target.name, size, %mime, "starting single-shot upload");

        let presign = PresignRequest {
            filename: target.name.to_string(),
            mime: mime.clone(),
            size,
            extension: extension_of(target.name),
            parent_id: target.parent_id,
            workspace_id: target.scope.workspace_id(),
            is_encrypted: target.scope.is_vault(),
            iv: target.scope.iv(),
        };
        let grant = self.api.presign(&presign, &self.cancel).await?;

        notify(target.progress, 0, size);
        let acl = Some(grant.acl.as_str()).filter(|acl| !acl.is_empty());
        self.put_object(OP_STORAGE_PUT, &grant.url, acl, data, None)
            .await?;
        notify(target.progress, size, size);

        let entry = self.register(&grant.key, &mime, size, target).await?;
        info!(name = target.name, entry_id = entry.id, "upload registered");
        Ok(UploadOutcome {
            entry,
            mode: UploadMode::SingleShot,
            size,
        })
    }

    /// PUTs one body to a presigned URL. Only a 200 counts as stored.
    async fn put_object(
        &self,
        op: &'static str,
        url: &str,
        acl: Option<&str>,
        body: Bytes,
        part: Option<u32>,
    ) -> Result<Response, TransferError> {
        let storage_err = |source: TransferError| {
            if source.is_cancelled() {
                TransferError::Cancelled
            } else {
                TransferError::Storage {
                    part,
                    source: Box::new(source),
                }
            }
        };

        let mut spec = RequestSpec::put(url, body);
        if let Some(acl) = acl {
            let value = HeaderValue::from_str(acl).map_err(|_| TransferError::Protocol {
                op,
                message: format!("unusable ACL value {acl:?}"),
            })?;
            spec = spec.with_header(HeaderName::from_static(X_AMZ_ACL), value);
        }

        let resp = self
            .storage
            .execute(op, &spec, &self.cancel)
            .await
            .map_err(storage_err)?;
        if resp.status() != StatusCode::OK {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(storage_err(api_error(op, status, &text)));
        }
        Ok(resp)
    }

    async fn register(
        &self,
        key: &str,
        mime: &str,
        size: u64,
        target: &UploadTarget<'_>,
    ) -> Result<cloudsh_protocol::FileEntry, TransferError> {
        let filename = key.rsplit_once('/').map_or(key, |(_, base)| base);
        let req = RegisterEntryRequest {
            parent_id: target.parent_id,
            filename: filename.to_string(),
            client_mime: mime.to_string(),
            client_name: target.name.to_string(),
            client_extension: extension_of(target.name),
            size,
            workspace_id: target.scope.workspace_id(),
            is_encrypted: target.scope.is_vault(),
            iv: target.scope.iv(),
        };
        self.api.register_entry(&req, &self.cancel).await
    }

    // -----------------------------------------------------------------------
    // Multipart
    // -----------------------------------------------------------------------

    async fn upload_multipart(
        &self,
        reader: &Arc<dyn ReadAt>,
        size: u64,
        target: &UploadTarget<'_>,
    ) -> Result<UploadOutcome, TransferError> {
        let slots = plan_parts(size, self.config.part_size)?;
        let part_count = slots.len() as u32;

        let prefix_len = size.min(SNIFF_LEN as u64) as usize;
        let prefix = read_range(reader, 0, prefix_len).await?;
        let mime = detect_mime(&prefix, target.name);
        info!(name = target.name, size, parts = part_count, %mime, "starting multipart upload");

        let create = CreateMultipartRequest {
            filename: target.name.to_string(),
            mime: mime.clone(),
            size,
            extension: extension_of(target.name),
            workspace_id: target.scope.workspace_id(),
        };
        let session = MultipartSession::open(&self.api, &create, &self.cancel)
            .await
            .map_err(|e| {
                if e.is_auth_expired() || e.is_cancelled() {
                    e
                } else {
                    TransferError::MultipartInit(Box::new(e))
                }
            })?;

        notify(target.progress, 0, size);
        let collector = PartCollector::new();
        let uploaded = self
            .upload_parts(&session, reader, &slots, &collector, size, target.progress)
            .await
            .and_then(|()| {
                collector
                    .into_parts(part_count)
                    .map_err(|source| PartsFailure {
                        failed: Vec::new(),
                        source,
                    })
            });

        let parts = match uploaded {
            Ok(parts) => parts,
            Err(failure) => return Err(self.abort_after_failure(session, failure).await),
        };

        let key = session.complete(parts, &self.cancel).await?;
        let entry = self.register(&key, &mime, size, target).await?;
        info!(name = target.name, entry_id = entry.id, "upload registered");
        Ok(UploadOutcome {
            entry,
            mode: UploadMode::Multipart { parts: part_count },
            size,
        })
    }

    /// Uploads all parts, one batch at a time. Parts inside a batch run
    /// concurrently; the next batch is not signed until the current one has
    /// fully settled.
    async fn upload_parts(
        &self,
        session: &MultipartSession<'_>,
        reader: &Arc<dyn ReadAt>,
        slots: &[PartSlot],
        collector: &PartCollector,
        total: u64,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), PartsFailure> {
        for batch in slots.chunks(self.config.batch_size.max(1)) {
            let numbers: Vec<u32> = batch.iter().map(|slot| slot.number).collect();
            if self.cancel.is_cancelled() {
                return Err(PartsFailure {
                    failed: numbers,
                    source: TransferError::Cancelled,
                });
            }

            let mut urls = match session.sign(&numbers, &self.cancel).await {
                Ok(urls) => urls,
                Err(source) => {
                    return Err(PartsFailure {
                        failed: numbers,
                        source,
                    });
                }
            };

            let mut uploads = Vec::with_capacity(batch.len());
            for slot in batch {
                let url = urls.remove(&slot.number).unwrap_or_default();
                uploads.push(self.upload_part(reader, *slot, url, collector, total, progress));
            }
            let results = join_all(uploads).await;

            let mut failed = Vec::new();
            let mut first_error = None;
            for (slot, result) in batch.iter().zip(results) {
                if let Err(e) = result {
                    warn!(upload_id = session.upload_id(), part = slot.number, error = %e, "part failed");
                    failed.push(slot.number);
                    first_error.get_or_insert(e);
                }
            }
            if let Some(source) = first_error {
                return Err(PartsFailure { failed, source });
            }
        }
        Ok(())
    }

    async fn upload_part(
        &self,
        reader: &Arc<dyn ReadAt>,
        slot: PartSlot,
        url: String,
        collector: &PartCollector,
        total: u64,
        progress: Option<&ProgressCallback>,
    ) -> Result<(), TransferError> {
        let len = usize::try_from(slot.len).map_err(|_| {
            TransferError::InvalidSource(format!("part of {} bytes does not fit in memory", slot.len))
        })?;
        let data = read_range(reader, slot.offset, len).await?;

        let resp = self
            .put_object(OP_PART_UPLOAD, &url, None, data, Some(slot.number))
            .await?;
        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TransferError::Storage {
                part: Some(slot.number),
                source: Box::new(TransferError::Protocol {
                    op: OP_PART_UPLOAD,
                    message: "response has no ETag header".into(),
                }),
            })?
            .to_string();

        let done = collector.record(slot.number, etag, slot.len);
        debug!(part = slot.number, bytes = slot.len, done, "part stored");
        notify(progress, done, total);
        Ok(())
    }

    /// Aborts the session once and turns the failure into the error the
    /// caller sees. An abort failure is logged, never returned.
    async fn abort_after_failure(
        &self,
        session: MultipartSession<'_>,
        failure: PartsFailure,
    ) -> TransferError {
        let upload_id = session.upload_id().to_string();
        // The abort must still reach the service after a cancellation.
        let abort_cancel = if self.cancel.is_cancelled() {
            CancellationToken::new()
        } else {
            self.cancel.clone()
        };
        if let Err(e) = session.abort(&abort_cancel).await {
            warn!(upload_id, error = %e, "multipart abort failed");
        }

        if failure.source.is_cancelled() {
            TransferError::Cancelled
        } else {
            TransferError::MultipartPartial {
                failed: failure.failed,
                source: Box::new(failure.source),
            }
        }
    }
}
