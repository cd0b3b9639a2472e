//! Shared test fixtures: fast retry policies, an authenticated client and a
//! wiremock stand-in for the metadata API plus the storage backend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use cloudsh_protocol::constants::{
    DOWNLOAD_PATH_PREFIX, MULTIPART_ABORT_PATH, MULTIPART_BATCH_SIGN_PATH,
    MULTIPART_COMPLETE_PATH, MULTIPART_CREATE_PATH, PRESIGN_PATH, REGISTER_ENTRY_PATH,
};

use crate::api::MetadataClient;
use crate::executor::{RequestExecutor, build_http_client};
use crate::retry::RetryPolicy;
use crate::types::TransferConfig;

/// Handle under which the fake service serves the last upload.
pub const FAKE_HANDLE: &str = "h1";

pub fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_retries,
        max_delay: Duration::from_millis(5),
    }
}

/// Small sizes so multipart paths run on a few kilobytes: threshold 1000,
/// 100-byte parts, batches of 8, fast retries.
pub fn test_config() -> TransferConfig {
    TransferConfig {
        multipart_threshold: 1000,
        part_size: 100,
        batch_size: 8,
        request_timeout: Duration::from_secs(10),
        api_retry: fast_policy(2),
        storage_retry: fast_policy(4),
    }
}

pub fn test_client(base_url: &str) -> MetadataClient {
    let http = build_http_client(Duration::from_secs(10)).unwrap();
    let exec = RequestExecutor::new(http, fast_policy(2)).with_token("test-token");
    MetadataClient::new(base_url, exec)
}

pub fn header<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn body_json(req: &Request) -> serde_json::Value {
    serde_json::from_slice(&req.body).unwrap()
}

/// Every request the server saw, in arrival order.
pub async fn requests(server: &MockServer) -> Vec<Request> {
    server.received_requests().await.unwrap_or_default()
}

/// Requests whose path starts with `prefix`.
pub async fn requests_to(server: &MockServer, prefix: &str) -> Vec<Request> {
    requests(server)
        .await
        .into_iter()
        .filter(|r| r.url.path().starts_with(prefix))
        .collect()
}

/// Signed part URLs pointing back at `base` under `/storage/part/{n}`.
pub fn sign_parts(req: &Request, base: &str) -> ResponseTemplate {
    let urls: Vec<_> = body_json(req)["partNumbers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| json!({"url": format!("{base}/storage/part/{n}"), "partNumber": n}))
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({ "urls": urls }))
}

/// Serves `data` with `Accept-Ranges: bytes` and open-ended range support.
pub fn serve_download(req: &Request, data: &[u8]) -> ResponseTemplate {
    let len = data.len();
    if req.method.as_str() == "HEAD" {
        return ResponseTemplate::new(200)
            .insert_header("Accept-Ranges", "bytes")
            .insert_header("Content-Length", len.to_string());
    }

    let start = header(req, "range")
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|r| r.parse::<usize>().ok());
    match start {
        Some(start) if start >= len => {
            ResponseTemplate::new(416).insert_header("Content-Range", format!("bytes */{len}"))
        }
        Some(start) => ResponseTemplate::new(206)
            .insert_header("Accept-Ranges", "bytes")
            .insert_header("Content-Range", format!("bytes {start}-{}/{len}", len - 1))
            .set_body_bytes(data[start..].to_vec()),
        None => ResponseTemplate::new(200)
            .insert_header("Accept-Ranges", "bytes")
            .set_body_bytes(data.to_vec()),
    }
}

/// In-memory stand-in for the metadata API plus the storage backend.
///
/// Presigned URLs point back at the same server under `/storage/`. Uploaded
/// bytes are kept and served again from the download endpoint.
pub struct FakeCloud {
    pub server: MockServer,
    simple: Arc<Mutex<Vec<u8>>>,
    parts: Arc<Mutex<BTreeMap<u32, Vec<u8>>>>,
}

impl FakeCloud {
    /// `fail_part` makes every PUT of that part number answer 500.
    pub async fn start(fail_part: Option<u32>) -> Self {
        let server = MockServer::start().await;
        let base = server.uri();
        let simple = Arc::new(Mutex::new(Vec::new()));
        let parts = Arc::new(Mutex::new(BTreeMap::new()));

        Mock::given(method("POST"))
            .and(path(PRESIGN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": format!("{base}/storage/simple/obj1"),
                "acl": "private",
                "key": "uploads/abc/obj1",
            })))
            .mount(&server)
            .await;

        let stored = Arc::clone(&simple);
        Mock::given(method("PUT"))
            .and(path("/storage/simple/obj1"))
            .respond_with(move |req: &Request| {
                *stored.lock().unwrap() = req.body.clone();
                ResponseTemplate::new(200).insert_header("ETag", "\"simple\"")
            })
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(MULTIPART_CREATE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"uploadId": "up-1", "key": "uploads/xyz/big"})),
            )
            .mount(&server)
            .await;

        let sign_base = base.clone();
        Mock::given(method("POST"))
            .and(path(MULTIPART_BATCH_SIGN_PATH))
            .respond_with(move |req: &Request| sign_parts(req, &sign_base))
            .mount(&server)
            .await;

        let stored = Arc::clone(&parts);
        Mock::given(method("PUT"))
            .and(path_regex(r"^/storage/part/\d+$"))
            .respond_with(move |req: &Request| {
                let n: u32 = req.url.path()["/storage/part/".len()..].parse().unwrap();
                if fail_part == Some(n) {
                    return ResponseTemplate::new(500);
                }
                stored.lock().unwrap().insert(n, req.body.clone());
                ResponseTemplate::new(200).insert_header("ETag", format!("\"etag-{n}\""))
            })
            .mount(&server)
            .await;

        for done in [MULTIPART_COMPLETE_PATH, MULTIPART_ABORT_PATH] {
            Mock::given(method("POST"))
                .and(path(done))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
                .mount(&server)
                .await;
        }

        Mock::given(method("POST"))
            .and(path(REGISTER_ENTRY_PATH))
            .respond_with(|req: &Request| {
                let body = body_json(req);
                ResponseTemplate::new(200).set_body_json(json!({
                    "fileEntry": {
                        "id": 1,
                        "name": body["clientName"],
                        "file_size": body["size"],
                        "mime": body["clientMime"],
                        "hash": FAKE_HANDLE,
                        "parent_id": body["parentId"],
                    }
                }))
            })
            .mount(&server)
            .await;

        let (single, multi) = (Arc::clone(&simple), Arc::clone(&parts));
        Mock::given(path_regex(format!("^{DOWNLOAD_PATH_PREFIX}")))
            .respond_with(move |req: &Request| {
                let data: Vec<u8> = {
                    let single = single.lock().unwrap();
                    if single.is_empty() {
                        multi.lock().unwrap().values().flatten().copied().collect()
                    } else {
                        single.clone()
                    }
                };
                serve_download(req, &data)
            })
            .mount(&server)
            .await;

        Self {
            server,
            simple,
            parts,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    pub async fn requests(&self) -> Vec<Request> {
        requests(&self.server).await
    }

    pub async fn requests_to(&self, prefix: &str) -> Vec<Request> {
        requests_to(&self.server, prefix).await
    }

    /// Bytes received by the single-shot storage URL.
    pub fn stored(&self) -> Vec<u8> {
        self.simple.lock().unwrap().clone()
    }

    /// Bytes received by part URLs, concatenated in part order.
    pub fn stored_parts(&self) -> Vec<u8> {
        self.parts.lock().unwrap().values().flatten().copied().collect()
    }
}
