//! Proxy Dispatcher - Main application use case
//!
//! Forwards one inbound request to a backend chosen by the balancing
//! strategy. The request body is buffered (bounded) so a dispatch that
//! fails at the transport layer can be retried against another backend.
//! Any HTTP response received from a backend, 5xx included, is forwarded
//! verbatim: a server-observed request is never retried.

use crate::domain::services::{SelectError, Strategy};
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use reqwest::Url;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Largest request body that will be buffered for retry.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Hop-by-hop headers are connection-local (RFC 7230 §6.1) and must not be
/// forwarded in either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request dispatcher: strategy selection, upstream forwarding, retry.
pub struct ProxyDispatcher {
    strategy: Arc<Strategy>,
    client: reqwest::Client,
    /// Whether the strategy claims a slot per `next` that must be released.
    /// Checked once here instead of per request.
    tracks_occupancy: bool,
}

impl ProxyDispatcher {
    pub fn new(strategy: Arc<Strategy>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build upstream HTTP client");

        let tracks_occupancy = strategy.tracks_occupancy();
        Self {
            strategy,
            client,
            tracks_occupancy,
        }
    }

    /// Forward one request, retrying transport failures across alternate
    /// backends up to the pool size.
    pub async fn dispatch(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();

        let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(_) => {
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response()
            }
        };

        let mut upstream_headers = strip_hop_by_hop(&parts.headers);
        upstream_headers.remove(header::HOST);
        upstream_headers.remove(header::CONTENT_LENGTH);

        let path = parts.uri.path();
        let query = parts.uri.query();

        let attempts = self.strategy.registry().len();
        for attempt in 1..=attempts {
            let url = match self.strategy.next() {
                Ok(url) => url,
                Err(SelectError::NoAvailableBackend) => {
                    tracing::warn!("no available backend");
                    return (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
                        .into_response();
                }
            };
            let release = ReleaseGuard::claim(self.tracks_occupancy, &self.strategy, &url);

            let target = build_target(&url, path, query);
            let result = self
                .client
                .request(parts.method.clone(), target)
                .headers(upstream_headers.clone())
                .body(body_bytes.clone())
                .send()
                .await;

            match result {
                Ok(upstream) => {
                    tracing::debug!(
                        backend = %url,
                        status = %upstream.status(),
                        attempt,
                        "forwarded request"
                    );
                    return forward_response(upstream, release);
                }
                Err(e) => {
                    tracing::warn!(backend = %url, error = %e, attempt, "backend unreachable");
                    self.strategy.registry().mark_status(url.as_str(), false);
                    drop(release);
                }
            }
        }

        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service unavailable after retries",
        )
            .into_response()
    }
}

/// Turn an upstream response into the client response, streaming the body.
/// The release guard rides along with the body stream so the strategy's
/// connection slot is held until the body has fully drained.
fn forward_response(upstream: reqwest::Response, release: ReleaseGuard) -> Response {
    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers());

    let stream = GuardedStream {
        inner: Box::pin(upstream.bytes_stream()),
        _release: release,
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Target URL: the backend's scheme and authority with the original
/// request's path and raw query.
fn build_target(backend: &Url, path: &str, query: Option<&str>) -> Url {
    let mut target = backend.clone();
    target.set_path(path);
    target.set_query(query);
    target
}

/// Clone a header map minus hop-by-hop headers, including any header the
/// `Connection` header nominates.
fn strip_hop_by_hop(src: &HeaderMap) -> HeaderMap {
    let nominated: Vec<String> = src
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    let mut dst = HeaderMap::with_capacity(src.len());
    for (name, value) in src {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str())
            || nominated.iter().any(|n| n == name.as_str())
        {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
    dst
}

/// Releases the strategy's connection slot exactly once, on drop: either
/// explicitly after a failed attempt, or when the proxied response body
/// finishes streaming.
struct ReleaseGuard {
    strategy: Option<Arc<Strategy>>,
    url: String,
}

impl ReleaseGuard {
    fn claim(tracks_occupancy: bool, strategy: &Arc<Strategy>, url: &Url) -> Self {
        Self {
            strategy: tracks_occupancy.then(|| strategy.clone()),
            url: url.as_str().to_string(),
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(strategy) = self.strategy.take() {
            strategy.release(&self.url);
        }
    }
}

/// Body stream that carries the release guard until exhaustion.
struct GuardedStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    _release: ReleaseGuard,
}

impl Stream for GuardedStream {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}
