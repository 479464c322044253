//! In-process API server double for exercising the real `kube::Client`.
//!
//! Requests are captured as they leave the client (method, path, query,
//! content type and decoded JSON body) and answered by a routing closure.

use http::{Method, Request, Response, StatusCode};
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};
use tower_test::mock::{self, Handle};

/// What the client put on the wire
#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub content_type: Option<String>,
    pub body: Value,
}

pub(crate) struct ApiServer {
    handle: Handle<Request<Body>, Response<Body>>,
}

/// A client wired to an [`ApiServer`] instead of a cluster
pub(crate) fn mock_client() -> (Client, ApiServer) {
    let (service, handle) = mock::pair::<Request<Body>, Response<Body>>();
    (Client::new(service, "default"), ApiServer { handle })
}

impl ApiServer {
    /// Answer exactly `count` requests with whatever `route` returns for each
    pub(crate) async fn serve<F>(mut self, count: usize, route: F) -> Vec<CapturedRequest>
    where
        F: Fn(&CapturedRequest) -> (StatusCode, Value) + Send + 'static,
    {
        let mut captured = Vec::with_capacity(count);
        for _ in 0..count {
            let (request, send) = self
                .handle
                .next_request()
                .await
                .expect("client sent fewer requests than expected");
            let (parts, body) = request.into_parts();
            let bytes = body.collect_bytes().await.unwrap();
            let request = CapturedRequest {
                method: parts.method,
                path: parts.uri.path().to_string(),
                query: parts.uri.query().unwrap_or_default().to_string(),
                content_type: parts
                    .headers
                    .get(http::header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string),
                body: if bytes.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_slice(&bytes).unwrap()
                },
            };

            let (status, response) = route(&request);
            send.send_response(
                Response::builder()
                    .status(status)
                    .body(Body::from(serde_json::to_vec(&response).unwrap()))
                    .unwrap(),
            );
            captured.push(request);
        }
        captured
    }
}

/// Body of a list response
pub(crate) fn list(api_version: &str, kind: &str, items: Vec<Value>) -> Value {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": {"resourceVersion": "1"},
        "items": items,
    })
}

/// Body of a failed request
pub(crate) fn status_failure(code: u16, reason: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Status",
        "metadata": {},
        "status": "Failure",
        "message": format!("request rejected: {reason}"),
        "reason": reason,
        "code": code,
    })
}
