//! Resilient request executor.
//!
//! Runs one logical HTTP exchange with retry, exponential backoff and
//! cancellation. Classification:
//!
//! - 401 fails immediately with [`TransferError::AuthExpired`].
//! - Any other status below 500 is final and handed back to the caller.
//! - 5xx and transport failures are retried until the policy's budget is
//!   spent, then reported as [`TransferError::RetriesExhausted`].

use std::error::Error as _;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cloudsh_protocol::ApiErrorBody;

use crate::TransferError;
use crate::retry::RetryPolicy;

/// A fully formed request. The body is held as [`Bytes`] so every attempt
/// replays it from the start.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Attach the bearer token. Presigned storage URLs carry their own
    /// credential and must not get one.
    pub authenticated: bool,
}

impl RequestSpec {
    /// Creates an authenticated request without a body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            authenticated: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    /// Creates an unauthenticated PUT of raw bytes, as used for presigned URLs.
    pub fn put(url: impl Into<String>, body: Bytes) -> Self {
        Self {
            body: Some(body),
            authenticated: false,
            ..Self::new(Method::PUT, url)
        }
    }

    /// Creates an authenticated POST with a JSON body.
    pub fn post_json<T: Serialize>(url: impl Into<String>, payload: &T) -> Result<Self, TransferError> {
        let body = serde_json::to_vec(payload)?;
        let mut spec = Self::new(Method::POST, url);
        spec.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        spec.headers
            .insert(reqwest::header::ACCEPT, HeaderValue::from_static("application/json"));
        spec.body = Some(Bytes::from(body));
        Ok(spec)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// What to do with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Final,
    AuthExpired,
    Retry,
}

pub(crate) fn classify_status(status: StatusCode) -> Verdict {
    if status == StatusCode::UNAUTHORIZED {
        Verdict::AuthExpired
    } else if status.is_server_error() {
        Verdict::Retry
    } else {
        Verdict::Final
    }
}

/// Executes requests against one HTTP client under one retry policy.
///
/// Cloning is cheap; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    http: reqwest::Client,
    token: Option<String>,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(http: reqwest::Client, policy: RetryPolicy) -> Self {
        Self {
            http,
            token: None,
            policy,
        }
    }

    /// Sets the bearer token attached to authenticated requests.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = if token.is_empty() { None } else { Some(token) };
        self
    }

    /// Returns a copy sharing the same client and token under another policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `spec`, retrying transient failures.
    ///
    /// Cancellation is honored during the backoff wait and while a request
    /// is in flight; either way the result is [`TransferError::Cancelled`].
    pub async fn execute(
        &self,
        op: &'static str,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<Response, TransferError> {
        let attempts = self.policy.attempts();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let cause = match self.send_once(op, spec, cancel).await? {
                Ok(resp) => return Ok(resp),
                Err(cause) => cause,
            };

            attempt += 1;
            if attempt >= attempts {
                warn!(op, attempts, error = %cause, "retries exhausted");
                return Err(TransferError::RetriesExhausted {
                    op,
                    attempts,
                    last: Box::new(cause),
                });
            }

            let delay = self.policy.delay_for_attempt(attempt - 1);
            warn!(
                op,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "request failed, retrying"
            );
            sleep_or_cancel(delay, cancel).await?;
        }
    }

    /// One attempt. The outer `Result` carries terminal failures, the inner
    /// one retriable causes.
    async fn send_once(
        &self,
        op: &'static str,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<Result<Response, TransferError>, TransferError> {
        let request = self.build(spec);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = request.send() => result,
        };

        let resp = match outcome {
            Ok(resp) => resp,
            Err(e) => return Ok(Err(network_error(op, &e))),
        };

        let status = resp.status();
        match classify_status(status) {
            Verdict::AuthExpired => {
                warn!(op, "access token rejected");
                Err(TransferError::AuthExpired { op })
            }
            Verdict::Retry => Ok(Err(TransferError::Server {
                op,
                status: status.as_u16(),
            })),
            Verdict::Final => {
                debug!(op, status = status.as_u16(), "request finished");
                Ok(Ok(resp))
            }
        }
    }

    fn build(&self, spec: &RequestSpec) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(spec.method.clone(), &spec.url)
            .headers(spec.headers.clone());
        if spec.authenticated
            && let Some(token) = &self.token
        {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &spec.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Builds the HTTP client shared by every executor.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, TransferError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("cloudsh/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(TransferError::HttpClient)
}

/// Converts a transport failure into [`TransferError::Network`], attaching a
/// remediation hint for recognizable TLS and connection problems.
pub(crate) fn network_error(op: &'static str, err: &reqwest::Error) -> TransferError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    let hint = if err.is_timeout() {
        Some("the request timed out; the network may be slow or the server overloaded")
    } else {
        remediation_hint(&message)
    };
    TransferError::Network { op, message, hint }
}

/// Maps known TLS and connection-reset signatures to a user-facing hint.
pub(crate) fn remediation_hint(message: &str) -> Option<&'static str> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("certificate") || lower.contains("unknown issuer") {
        Some("the server certificate was rejected; check the system clock and any TLS-intercepting proxy")
    } else if lower.contains("handshake") || lower.contains("tls") {
        Some("the TLS handshake failed; a proxy or firewall may be interfering with HTTPS")
    } else if lower.contains("connection reset") || lower.contains("broken pipe") {
        Some("the connection was reset; check VPN or proxy settings and try again")
    } else if lower.contains("dns") || lower.contains("failed to lookup address") {
        Some("the host name could not be resolved; check your network connection")
    } else {
        None
    }
}

/// Turns a non-2xx final response into [`TransferError::Api`].
pub(crate) async fn ensure_success(
    op: &'static str,
    resp: Response,
) -> Result<Response, TransferError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(api_error(op, status, &body))
}

/// Builds an API error with the most specific message available: the
/// service message, else the status text.
pub(crate) fn api_error(op: &'static str, status: StatusCode, body: &str) -> TransferError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.best_message())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    TransferError::Api {
        op,
        status: status.as_u16(),
        message,
    }
}

/// Checks the status and decodes a JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    op: &'static str,
    resp: Response,
) -> Result<T, TransferError> {
    let resp = ensure_success(op, resp).await?;
    let body = resp
        .bytes()
        .await
        .map_err(|e| network_error(op, &e))?;
    serde_json::from_slice(&body).map_err(|e| TransferError::Protocol {
        op,
        message: format!("invalid JSON body: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_server::{fast_policy, header, requests};

    fn executor(max_retries: u32) -> RequestExecutor {
        let http = build_http_client(Duration::from_secs(10)).unwrap();
        RequestExecutor::new(http, fast_policy(max_retries)).with_token("secret")
    }

    #[test]
    fn classify_statuses() {
        assert_eq!(classify_status(StatusCode::OK), Verdict::Final);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Verdict::Final);
        assert_eq!(classify_status(StatusCode::UNPROCESSABLE_ENTITY), Verdict::Final);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), Verdict::AuthExpired);
        assert_eq!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), Verdict::Retry);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), Verdict::Retry);
    }

    #[test]
    fn hints_for_known_signatures() {
        assert!(remediation_hint("invalid peer certificate: UnknownIssuer").is_some());
        assert!(remediation_hint("tls handshake eof").is_some());
        assert!(remediation_hint("Connection reset by peer (os error 104)").is_some());
        assert!(remediation_hint("something else entirely").is_none());
    }

    #[test]
    fn api_error_extracts_service_message() {
        let err = api_error(
            "presign",
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"Storage quota exceeded"}"#,
        );
        assert_eq!(err.to_string(), "presign: Storage quota exceeded (HTTP 422)");
    }

    #[test]
    fn api_error_falls_back_to_status_text() {
        let err = api_error("presign", StatusCode::FORBIDDEN, "<html>nope</html>");
        assert_eq!(err.to_string(), "presign: Forbidden (HTTP 403)");
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        let exec = executor(5);

        let spec = RequestSpec::get(format!("{}/me", server.uri()));
        let result = exec.execute("whoami", &spec, &CancellationToken::new()).await;

        assert!(matches!(result, Err(TransferError::AuthExpired { op: "whoami" })));
    }

    #[tokio::test]
    async fn client_error_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "gone"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let exec = executor(5);

        let spec = RequestSpec::get(format!("{}/missing", server.uri()));
        let resp = exec
            .execute("lookup", &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_errors_then_success() {
        let server = MockServer::start().await;
        // First two return 500
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;
        let exec = executor(3);

        let spec = RequestSpec::get(format!("{}/flaky", server.uri()));
        let resp = exec
            .execute("flaky", &spec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(requests(&server).await.len(), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_after_budget() {
        let max_retries = 3;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(u64::from(max_retries) + 1)
            .mount(&server)
            .await;
        let exec = executor(max_retries);

        let spec = RequestSpec::get(format!("{}/down", server.uri()));
        let err = exec
            .execute("down", &spec, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            TransferError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, max_retries + 1);
                assert!(matches!(*last, TransferError::Server { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn body_is_replayed_on_every_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/obj"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let exec = executor(2);

        let spec = RequestSpec::put(format!("{}/obj", server.uri()), Bytes::from_static(b"payload"));
        let _ = exec.execute("put", &spec, &CancellationToken::new()).await;

        let seen = requests(&server).await;
        assert_eq!(seen.len(), 3);
        for req in &seen {
            assert_eq!(req.body, b"payload");
            assert_eq!(header(req, "content-length"), Some("7"));
        }
    }

    #[tokio::test]
    async fn bearer_token_only_on_authenticated_requests() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let exec = executor(0);
        let cancel = CancellationToken::new();

        exec.execute("get", &RequestSpec::get(format!("{}/a", server.uri())), &cancel)
            .await
            .unwrap();
        exec.execute(
            "put",
            &RequestSpec::put(format!("{}/b", server.uri()), Bytes::from_static(b"x")),
            &cancel,
        )
        .await
        .unwrap();

        let seen = requests(&server).await;
        assert_eq!(header(&seen[0], "authorization"), Some("Bearer secret"));
        assert_eq!(header(&seen[1], "authorization"), None);
    }

    #[tokio::test]
    async fn cancellation_during_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let http = build_http_client(Duration::from_secs(10)).unwrap();
        let exec = RequestExecutor::new(
            http,
            RetryPolicy {
                base_delay: Duration::from_secs(20),
                max_retries: 3,
                max_delay: Duration::from_secs(30),
            },
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let spec = RequestSpec::get(format!("{}/slow", server.uri()));
        let err = exec.execute("slow", &spec, &cancel).await.unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn already_cancelled_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let exec = executor(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let spec = RequestSpec::get(format!("{}/never", server.uri()));
        let err = exec.execute("never", &spec, &cancel).await.unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
    }

    #[tokio::test]
    async fn connection_refused_is_retried_then_exhausted() {
        // Bind and drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let exec = executor(1);
        let spec = RequestSpec::get(format!("http://127.0.0.1:{port}/"));
        let err = exec
            .execute("refused", &spec, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            TransferError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, TransferError::Network { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
