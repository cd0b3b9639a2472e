//! Metadata-service calls used by the transfer engine.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use cloudsh_protocol::constants::{
    MULTIPART_ABORT_PATH, MULTIPART_BATCH_SIGN_PATH, MULTIPART_COMPLETE_PATH,
    MULTIPART_CREATE_PATH, PRESIGN_PATH, REGISTER_ENTRY_PATH,
};
use cloudsh_protocol::{
    AbortMultipartRequest, BatchSignRequest, BatchSignResponse, CompleteMultipartRequest,
    CreateMultipartRequest, CreateMultipartResponse, FileEntry, PresignRequest, PresignResponse,
    RegisterEntryRequest, RegisterEntryResponse,
};

use crate::TransferError;
use crate::executor::{RequestExecutor, RequestSpec, ensure_success, read_json};

pub(crate) const OP_PRESIGN: &str = "presign";
pub(crate) const OP_MULTIPART_CREATE: &str = "multipart create";
pub(crate) const OP_BATCH_SIGN: &str = "batch sign";
pub(crate) const OP_MULTIPART_COMPLETE: &str = "multipart complete";
pub(crate) const OP_MULTIPART_ABORT: &str = "multipart abort";
pub(crate) const OP_REGISTER_ENTRY: &str = "register entry";

/// Authenticated JSON client for the metadata service.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    base_url: String,
    executor: RequestExecutor,
}

impl MetadataClient {
    pub fn new(base_url: impl Into<String>, executor: RequestExecutor) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, executor }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<Req, Resp>(
        &self,
        op: &'static str,
        path: &str,
        body: &Req,
        cancel: &CancellationToken,
    ) -> Result<Resp, TransferError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let spec = RequestSpec::post_json(self.url(path), body)?;
        let resp = self.executor.execute(op, &spec, cancel).await?;
        read_json(op, resp).await
    }

    /// Same as [`post`](Self::post) for endpoints whose response body is
    /// irrelevant.
    async fn post_unit<Req: Serialize>(
        &self,
        op: &'static str,
        path: &str,
        body: &Req,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let spec = RequestSpec::post_json(self.url(path), body)?;
        let resp = self.executor.execute(op, &spec, cancel).await?;
        ensure_success(op, resp).await?;
        Ok(())
    }

    pub async fn presign(
        &self,
        req: &PresignRequest,
        cancel: &CancellationToken,
    ) -> Result<PresignResponse, TransferError> {
        let grant: PresignResponse = self.post(OP_PRESIGN, PRESIGN_PATH, req, cancel).await?;
        debug!(key = %grant.key, "presign granted");
        Ok(grant)
    }

    pub async fn create_multipart(
        &self,
        req: &CreateMultipartRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateMultipartResponse, TransferError> {
        self.post(OP_MULTIPART_CREATE, MULTIPART_CREATE_PATH, req, cancel)
            .await
    }

    pub async fn batch_sign(
        &self,
        req: &BatchSignRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchSignResponse, TransferError> {
        self.post(OP_BATCH_SIGN, MULTIPART_BATCH_SIGN_PATH, req, cancel)
            .await
    }

    pub async fn complete_multipart(
        &self,
        req: &CompleteMultipartRequest,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        self.post_unit(OP_MULTIPART_COMPLETE, MULTIPART_COMPLETE_PATH, req, cancel)
            .await
    }

    pub async fn abort_multipart(
        &self,
        req: &AbortMultipartRequest,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        self.post_unit(OP_MULTIPART_ABORT, MULTIPART_ABORT_PATH, req, cancel)
            .await
    }

    pub async fn register_entry(
        &self,
        req: &RegisterEntryRequest,
        cancel: &CancellationToken,
    ) -> Result<FileEntry, TransferError> {
        let resp: RegisterEntryResponse = self
            .post(OP_REGISTER_ENTRY, REGISTER_ENTRY_PATH, req, cancel)
            .await?;
        Ok(resp.file_entry)
    }
}
