//! Loopback stand-in for the hosted services, used by the HTTP client tests.

use axum::{
    http::{HeaderMap, Method, StatusCode, Uri},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// One request as the upstream saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Decoded `key=value` pairs of the query string.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .into_owned()
            .collect()
    }
}

pub struct Upstream {
    pub url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl Upstream {
    /// Serves `reply` with `status` for every request on an ephemeral port.
    pub async fn start(status: StatusCode, reply: Value) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let app = Router::new().fallback(
            move |method: Method, uri: Uri, headers: HeaderMap, body: String| {
                let log = log.clone();
                let reply = reply.clone();
                async move {
                    log.lock().push(SeenRequest {
                        method,
                        path: uri.path().to_string(),
                        query: uri.query().unwrap_or("").to_string(),
                        headers,
                        body: serde_json::from_str(&body).unwrap_or(Value::Null),
                    });
                    (status, Json(reply))
                }
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{}", addr),
            seen,
        }
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }

    pub fn only_request(&self) -> SeenRequest {
        let requests = self.requests();
        assert_eq!(requests.len(), 1, "expected exactly one upstream call");
        requests[0].clone()
    }
}
