//! Wire types for the remote storage service.
//!
//! Every metadata-API call is a JSON request/response pair over HTTPS. This
//! crate only holds the shapes; the transfer engine owns the transport.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    AbortMultipartRequest, BatchSignRequest, BatchSignResponse, CompleteMultipartRequest,
    CompletedPart, CreateMultipartRequest, CreateMultipartResponse, PresignRequest,
    PresignResponse, RegisterEntryRequest, RegisterEntryResponse, SignedPartUrl,
};
pub use types::{ApiErrorBody, FileEntry};
