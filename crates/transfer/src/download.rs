//! Download with byte-range resumption.

use std::io::SeekFrom;

use reqwest::header::{
    ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderMap, HeaderValue, RANGE,
};
use reqwest::{Response, StatusCode};
use tokio::io::{AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cloudsh_protocol::constants::download_path;

use crate::TransferError;
use crate::api::MetadataClient;
use crate::executor::{RequestSpec, api_error, ensure_success, network_error};
use crate::progress::{ProgressCallback, ProgressRelay};
use crate::types::{DownloadOutcome, RangeSupport};

const OP_DOWNLOAD: &str = "download";
const OP_PROBE: &str = "range probe";

/// A parsed `Content-Range: bytes start-end/total` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` for `/*`.
    pub total: Option<u64>,
}

pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange { start, end, total })
}

/// Total from the `bytes */total` form sent with a 416.
fn unsatisfied_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    value.trim().strip_prefix("bytes */")?.trim().parse().ok()
}

fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Full size behind a 206: the `Content-Range` total, else the range start
/// plus `Content-Length`, else 0 for unknown.
fn partial_total(headers: &HeaderMap, start: u64) -> u64 {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
        .and_then(|range| range.total)
        .or_else(|| header_u64(headers, CONTENT_LENGTH).map(|len| start + len))
        .unwrap_or(0)
}

/// Fetches entry content into a seekable sink.
pub struct DownloadEngine {
    api: MetadataClient,
    cancel: CancellationToken,
}

impl DownloadEngine {
    pub fn new(api: MetadataClient) -> Self {
        Self::with_cancel(api, CancellationToken::new())
    }

    pub fn with_cancel(api: MetadataClient, cancel: CancellationToken) -> Self {
        Self { api, cancel }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Asks whether `handle` can be fetched by range, and how long it is.
    pub async fn probe(&self, handle: &str) -> Result<RangeSupport, TransferError> {
        let spec = RequestSpec::head(self.api.url(&download_path(handle)));
        let resp = self.api.executor().execute(OP_PROBE, &spec, &self.cancel).await?;
        let resp = ensure_success(OP_PROBE, resp).await?;

        let accepts_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")));
        let content_length = header_u64(resp.headers(), CONTENT_LENGTH);

        debug!(handle, accepts_ranges, ?content_length, "range probe");
        Ok(RangeSupport {
            accepts_ranges,
            content_length,
        })
    }

    /// Downloads `handle` into `sink`.
    ///
    /// With `resume_offset > 0` a range starting there is requested. On a
    /// 206 the sink is positioned at the offset and only the remainder is
    /// written; if the server answers 200 instead, the sink is rewound and
    /// the whole content written, and the outcome reports `resumed: false`.
    pub async fn download<W>(
        &self,
        handle: &str,
        sink: &mut W,
        progress: Option<ProgressCallback>,
        resume_offset: u64,
    ) -> Result<DownloadOutcome, TransferError>
    where
        W: AsyncWrite + AsyncSeek + Unpin,
    {
        let mut spec = RequestSpec::get(self.api.url(&download_path(handle)));
        if resume_offset > 0 {
            let value = HeaderValue::from_str(&format!("bytes={resume_offset}-"))
                .map_err(|e| TransferError::Protocol {
                    op: OP_DOWNLOAD,
                    message: e.to_string(),
                })?;
            spec = spec.with_header(RANGE, value);
        }

        let resp = self.api.executor().execute(OP_DOWNLOAD, &spec, &self.cancel).await?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (start, total) = match status {
            StatusCode::PARTIAL_CONTENT => {
                let start = self.partial_start(&resp, resume_offset)?;
                (start, partial_total(resp.headers(), start))
            }
            StatusCode::RANGE_NOT_SATISFIABLE
                if resume_offset > 0
                    && unsatisfied_total(resp.headers()) == Some(resume_offset) =>
            {
                info!(handle, total = resume_offset, "download already complete");
                return Ok(DownloadOutcome {
                    total_size: resume_offset,
                    bytes_written: 0,
                    resumed: true,
                    content_type,
                });
            }
            s if s.is_success() => {
                if resume_offset > 0 {
                    warn!(handle, resume_offset, "range ignored by server, restarting from zero");
                }
                (0, header_u64(resp.headers(), CONTENT_LENGTH).unwrap_or(0))
            }
            _ => {
                let text = resp.text().await.unwrap_or_default();
                return Err(api_error(OP_DOWNLOAD, status, &text));
            }
        };

        sink.seek(SeekFrom::Start(start)).await?;
        let written = self.stream_body(resp, sink, start, total, progress).await?;

        let total_size = if total == 0 { start + written } else { total };
        let resumed = start > 0;
        info!(handle, total_size, written, resumed, "download finished");
        Ok(DownloadOutcome {
            total_size,
            bytes_written: written,
            resumed,
            content_type,
        })
    }

    /// Start of a 206 body. Falls back to the requested offset when the
    /// server omits `Content-Range`; a range that starts anywhere else is
    /// rejected.
    fn partial_start(&self, resp: &Response, resume_offset: u64) -> Result<u64, TransferError> {
        let Some(raw) = resp.headers().get(CONTENT_RANGE) else {
            return Ok(resume_offset);
        };
        let range = raw
            .to_str()
            .ok()
            .and_then(parse_content_range)
            .ok_or_else(|| TransferError::Protocol {
                op: OP_DOWNLOAD,
                message: format!("unparseable Content-Range {raw:?}"),
            })?;
        if range.start != resume_offset {
            return Err(TransferError::Protocol {
                op: OP_DOWNLOAD,
                message: format!(
                    "asked for bytes from {resume_offset}, got a range starting at {}",
                    range.start
                ),
            });
        }
        Ok(range.start)
    }

    async fn stream_body<W>(
        &self,
        mut resp: Response,
        sink: &mut W,
        start: u64,
        total: u64,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut relay = ProgressRelay::new(sink, start, total, progress);
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                chunk = resp.chunk() => chunk.map_err(|e| network_error(OP_DOWNLOAD, &e))?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            relay.write_all(&chunk).await?;
        }
        relay.flush().await?;
        Ok(relay.position() - start)
    }
}
