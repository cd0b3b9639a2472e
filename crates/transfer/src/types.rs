use std::fmt;
use std::time::Duration;

use cloudsh_protocol::FileEntry;

use crate::progress::ProgressCallback;
use crate::retry::RetryPolicy;
use crate::source::ByteSource;
use crate::validation::validate_entry_name;
use crate::{
    DEFAULT_BATCH_SIZE, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, DEFAULT_REQUEST_TIMEOUT,
    TransferError,
};

/// Tunables for the transfer engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    /// Uploads strictly larger than this use the multipart path.
    pub multipart_threshold: u64,
    /// Size of every multipart part except possibly the last.
    pub part_size: u64,
    /// Parts signed per batch-sign call; also the part concurrency limit.
    pub batch_size: usize,
    /// Client-side timeout for one HTTP exchange.
    pub request_timeout: Duration,
    /// Policy for metadata-API calls.
    pub api_retry: RetryPolicy,
    /// Policy for presigned storage PUTs.
    pub storage_retry: RetryPolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            api_retry: RetryPolicy::api(),
            storage_retry: RetryPolicy::storage(),
        }
    }
}

/// Where an upload is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// A workspace; `0` is the personal workspace.
    Workspace(i64),
    /// The encrypted vault. The payload is already ciphertext and `iv` is
    /// the encoded initialization vector used to produce it.
    Vault { iv: String },
}

impl Default for Scope {
    fn default() -> Self {
        Self::Workspace(0)
    }
}

impl Scope {
    pub fn is_vault(&self) -> bool {
        matches!(self, Self::Vault { .. })
    }

    pub(crate) fn workspace_id(&self) -> Option<i64> {
        match self {
            Self::Workspace(id) => Some(*id),
            Self::Vault { .. } => None,
        }
    }

    pub(crate) fn iv(&self) -> Option<String> {
        match self {
            Self::Workspace(_) => None,
            Self::Vault { iv } => Some(iv.clone()),
        }
    }
}

/// One upload. Built once and consumed by the orchestrator.
pub struct TransferRequest {
    pub(crate) source: ByteSource,
    pub(crate) name: String,
    pub(crate) size: Option<u64>,
    pub(crate) parent_id: Option<i64>,
    pub(crate) scope: Scope,
    pub(crate) progress: Option<ProgressCallback>,
}

impl TransferRequest {
    /// Creates a request after validating `name`.
    pub fn new(source: ByteSource, name: impl Into<String>) -> Result<Self, TransferError> {
        let name = name.into();
        validate_entry_name(&name)?;
        Ok(Self {
            source,
            name,
            size: None,
            parent_id: None,
            scope: Scope::default(),
            progress: None,
        })
    }

    /// Declares the payload size. Zero counts as unknown.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = (size > 0).then_some(size);
        self
    }

    /// Destination folder; `None` is the root folder.
    pub fn with_parent(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_size(&self) -> Option<u64> {
        self.size
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("source", &self.source)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("parent_id", &self.parent_id)
            .field("scope", &self.scope)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Which upload path ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    SingleShot,
    Multipart { parts: u32 },
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub entry: FileEntry,
    pub mode: UploadMode,
    /// Bytes sent to storage.
    pub size: u64,
}

/// Result of a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Full size of the resource.
    pub total_size: u64,
    /// Bytes written by this call.
    pub bytes_written: u64,
    /// `false` when a range was requested but the server sent everything.
    pub resumed: bool,
    pub content_type: Option<String>,
}

/// Result of a range-capability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSupport {
    pub accepts_ranges: bool,
    pub content_length: Option<u64>,
}
