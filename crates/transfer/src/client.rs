use tokio::io::{AsyncSeek, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::TransferError;
use crate::api::MetadataClient;
use crate::download::DownloadEngine;
use crate::executor::{RequestExecutor, build_http_client};
use crate::progress::ProgressCallback;
use crate::types::{DownloadOutcome, RangeSupport, TransferConfig, TransferRequest, UploadOutcome};
use crate::upload::UploadOrchestrator;

/// Upload and download against one account, sharing a connection pool and
/// a cancellation token.
pub struct TransferClient {
    uploader: UploadOrchestrator,
    downloader: DownloadEngine,
    cancel: CancellationToken,
}

impl TransferClient {
    /// Builds a client for `base_url` authenticated with `token`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        config: TransferConfig,
    ) -> Result<Self, TransferError> {
        let http = build_http_client(config.request_timeout)?;
        let executor = RequestExecutor::new(http, config.api_retry).with_token(token);
        Ok(Self::from_api(MetadataClient::new(base_url, executor), config))
    }

    pub fn from_api(api: MetadataClient, config: TransferConfig) -> Self {
        let cancel = CancellationToken::new();
        Self {
            uploader: UploadOrchestrator::with_cancel(api.clone(), config, cancel.clone()),
            downloader: DownloadEngine::with_cancel(api, cancel.clone()),
            cancel,
        }
    }

    /// Cancelling this token stops every transfer started by this client.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn upload(&self, request: TransferRequest) -> Result<UploadOutcome, TransferError> {
        self.uploader.upload(request).await
    }

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
        self.downloader
            .download(handle, sink, progress, resume_offset)
            .await
    }

    pub async fn probe(&self, handle: &str) -> Result<RangeSupport, TransferError> {
        self.downloader.probe(handle).await
    }
}
