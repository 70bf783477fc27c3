//! HTTP Server
//!
//! Assembles the public surface: the admin endpoint for toggling backend
//! liveness, the gated `/api/v1` client-management subtree, and the proxy
//! fallback that every other request flows through. The rate-limit gate
//! runs as middleware in front of the proxy only.

use crate::adapters::inbound::clients_api;
use crate::application::ProxyDispatcher;
use crate::domain::ports::ConfigStore;
use crate::domain::registry::BackendRegistry;
use crate::infrastructure::rate_limiter::TokenBucket;
use crate::infrastructure::shutdown::ShutdownController;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub dispatcher: Arc<ProxyDispatcher>,
    pub limiter: Option<Arc<TokenBucket>>,
    pub shutdown: ShutdownController,
}

/// Admin request to force a backend's liveness flag.
#[derive(Debug, Deserialize)]
struct BackendStatusRequest {
    url: String,
    alive: bool,
}

/// Build the full application router.
///
/// `store` is present exactly when rate limiting is enabled; without it
/// the `/api/v1` prefix answers 404 with a structured body.
pub fn build_router(state: AppState, store: Option<Arc<dyn ConfigStore>>) -> Router {
    let proxy = Router::new()
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_gate,
        ))
        .with_state(state.clone());

    let mut app = Router::new()
        .route("/admin/backend-status", post(backend_status_handler))
        .with_state(state);

    app = match store {
        Some(store) => app.nest("/api/v1", clients_api::router(store)),
        None => app
            .route("/api/v1", any(api_disabled_handler))
            .route("/api/v1/*rest", any(api_disabled_handler)),
    };

    app.merge(proxy)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// Bind and serve until the shutdown signal fires, then drain in-flight
/// requests bounded by `drain_timeout`.
pub async fn run(
    port: u16,
    router: Router,
    shutdown: ShutdownController,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let mut signal = shutdown.subscribe();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = signal.recv().await;
    })
    .await?;

    shutdown.wait_for_drain(drain_timeout).await;
    Ok(())
}

async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    let _guard = state.shutdown.request_guard();
    state.dispatcher.dispatch(req).await
}

/// Rate-limit gate in front of the proxy. When the limiter rejects, the
/// downstream handler chain is not invoked.
async fn rate_limit_gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(limiter) = &state.limiter else {
        return next.run(req).await;
    };

    let client_id = client_identity(&req);
    if limiter.allow(&client_id).await {
        next.run(req).await
    } else {
        tracing::debug!(client_id = %client_id, "rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "code": 429,
                "message": "Rate limit exceeded"
            })),
        )
            .into_response()
    }
}

/// Client identifier: the `X-API-Key` header when present, otherwise the
/// remote network address.
fn client_identity(req: &Request) -> String {
    if let Some(key) = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|key| !key.is_empty())
    {
        return key.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn backend_status_handler(
    State(state): State<AppState>,
    payload: Result<Json<BackendStatusRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => {
            state.registry.mark_status(&req.url, req.alive);
            (StatusCode::OK, "Backend status updated").into_response()
        }
        Err(_) => (StatusCode::BAD_REQUEST, "Invalid request body").into_response(),
    }
}

async fn api_disabled_handler() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "API endpoints disabled"})),
    )
        .into_response()
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}
