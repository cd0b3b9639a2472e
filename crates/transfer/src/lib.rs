//! Resilient file transfer for the cloudsh storage service.
//!
//! Uploads follow the presign → storage PUT → register handshake, switching
//! to batched multipart above [`DEFAULT_MULTIPART_THRESHOLD`]. Downloads can
//! resume from a byte offset. Every network call goes through
//! [`RequestExecutor`], which owns retry, backoff and cancellation.

mod api;
mod client;
mod download;
mod error;
mod executor;
mod multipart;
mod progress;
mod retry;
mod sniff;
mod source;
mod types;
mod upload;
mod validation;

#[cfg(test)]
mod test_server;

use std::time::Duration;

pub use api::MetadataClient;
pub use client::TransferClient;
pub use download::DownloadEngine;
pub use error::TransferError;
pub use executor::{RequestExecutor, RequestSpec, build_http_client};
pub use progress::{ProgressCallback, ProgressRelay, SpeedCalculator};
pub use retry::{MAX_BACKOFF, MAX_JITTER, RetryPolicy};
pub use sniff::{
    OCTET_STREAM, SNIFF_LEN, detect_mime, extension_of, mime_from_extension, sniff_bytes,
    sniff_reader,
};
pub use source::{ByteSource, ReadAt};
pub use types::{
    DownloadOutcome, RangeSupport, Scope, TransferConfig, TransferRequest, UploadMode,
    UploadOutcome,
};
pub use upload::UploadOrchestrator;
pub use validation::{MAX_NAME_LEN, validate_entry_name};

const MIB: u64 = 1024 * 1024;

/// Uploads strictly larger than this go multipart: 65 MiB.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 65 * MIB;

/// Multipart part size: 60 MiB.
pub const DEFAULT_PART_SIZE: u64 = 60 * MIB;

/// Parts signed per batch, and uploaded concurrently.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Per-request client timeout. Long enough for a full single-shot body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);
