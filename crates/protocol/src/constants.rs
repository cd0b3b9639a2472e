//! Endpoint paths, relative to the API base URL.

/// Requests a single-use presigned PUT URL.
pub const PRESIGN_PATH: &str = "/s3/simple/presign";

/// Opens a multipart session.
pub const MULTIPART_CREATE_PATH: &str = "/s3/multipart/create";

/// Signs a batch of part URLs for an open multipart session.
pub const MULTIPART_BATCH_SIGN_PATH: &str = "/s3/multipart/batch-sign-part-urls";

/// Completes a multipart session with its ordered part list.
pub const MULTIPART_COMPLETE_PATH: &str = "/s3/multipart/complete";

/// Aborts a multipart session and releases its storage-side state.
pub const MULTIPART_ABORT_PATH: &str = "/s3/multipart/abort";

/// Registers an uploaded storage object as a file entry.
pub const REGISTER_ENTRY_PATH: &str = "/s3/entries";

/// Prefix for entry downloads; the entry handle is appended.
pub const DOWNLOAD_PATH_PREFIX: &str = "/file-entries/download/";

/// MIME type sent for vault uploads, whose bytes are already encrypted.
pub const VAULT_MIME: &str = "application/octet-stream";

/// Builds the download path for an entry handle.
pub fn download_path(handle: &str) -> String {
    format!("{DOWNLOAD_PATH_PREFIX}{handle}")
}
