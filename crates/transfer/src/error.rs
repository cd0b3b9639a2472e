//! Transfer error types.

/// Errors produced by the transfer engine.
///
/// Every variant that originates from a remote call names the operation
/// that failed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{op}: authentication expired, please log in again")]
    AuthExpired { op: &'static str },

    #[error("{op}: {message}{}", hint_suffix(.hint))]
    Network {
        op: &'static str,
        message: String,
        hint: Option<&'static str>,
    },

    #[error("{op}: server error (HTTP {status})")]
    Server { op: &'static str, status: u16 },

    #[error("{op}: giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },

    #[error("{op}: {message} (HTTP {status})")]
    Api {
        op: &'static str,
        status: u16,
        message: String,
    },

    #[error("storage upload failed{}: {source}", part_suffix(.part))]
    Storage {
        part: Option<u32>,
        #[source]
        source: Box<TransferError>,
    },

    #[error("multipart upload could not be started: {0}")]
    MultipartInit(#[source] Box<TransferError>),

    #[error("multipart upload failed on parts {failed:?} and was aborted: {source}")]
    MultipartPartial {
        failed: Vec<u32>,
        #[source]
        source: Box<TransferError>,
    },

    #[error("{op}: unexpected response: {message}")]
    Protocol { op: &'static str, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    /// Returns `true` if this error, or any error it wraps, means the
    /// access token is no longer valid.
    pub fn is_auth_expired(&self) -> bool {
        match self {
            Self::AuthExpired { .. } => true,
            other => other.wrapped().is_some_and(Self::is_auth_expired),
        }
    }

    /// Returns `true` if this error, or any error it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            other => other.wrapped().is_some_and(Self::is_cancelled),
        }
    }

    fn wrapped(&self) -> Option<&TransferError> {
        match self {
            Self::RetriesExhausted { last, .. } => Some(last.as_ref()),
            Self::Storage { source, .. }
            | Self::MultipartPartial { source, .. }
            | Self::MultipartInit(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

fn hint_suffix(hint: &Option<&'static str>) -> String {
    hint.map(|h| format!(" (hint: {h})")).unwrap_or_default()
}

fn part_suffix(part: &Option<u32>) -> String {
    part.map(|p| format!(" for part {p}")).unwrap_or_default()
}
