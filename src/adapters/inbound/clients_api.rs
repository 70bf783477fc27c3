//! Client Management API
//!
//! CRUD over the rate-limit config store, mounted under `/api/v1` when
//! rate limiting is enabled. Every response carries the `Api-Version`
//! header so clients can detect contract drift.

use crate::domain::entities::RateConfig;
use crate::domain::ports::ConfigStore;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header::HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const API_VERSION_HEADER: &str = "api-version";
const API_VERSION: &str = "2023-07-01";

/// Create/update payload for a client's rate configuration.
#[derive(Debug, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub client_id: String,
    pub capacity: Option<i64>,
    pub rate_per_sec: Option<f64>,
}

/// Stored configuration echoed back to the caller.
#[derive(Debug, Serialize)]
pub struct ClientResponse {
    pub client_id: String,
    pub capacity: i64,
    pub rate_per_sec: f64,
}

/// Build the `/clients` router over a config store.
pub fn router(store: Arc<dyn ConfigStore>) -> Router {
    Router::new()
        .route("/clients", post(create_client))
        .route(
            "/clients/:id",
            get(get_client).put(update_client).delete(delete_client),
        )
        .with_state(store)
}

/// Field-wise validation; errors accumulate so the caller sees every
/// violated constraint at once.
fn validate(req: &ClientRequest) -> Result<(String, RateConfig), String> {
    let mut problems = Vec::new();

    if req.client_id.is_empty() {
        problems.push("field client_id: required".to_string());
    } else if !req.client_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        problems.push("field client_id: must be alphanumeric".to_string());
    }

    match req.capacity {
        None => problems.push("field capacity: required".to_string()),
        Some(c) if c <= 0 => {
            problems.push("field capacity: must be greater than zero".to_string())
        }
        Some(_) => {}
    }

    match req.rate_per_sec {
        None => problems.push("field rate_per_sec: required".to_string()),
        Some(r) if r <= 0.0 => {
            problems.push("field rate_per_sec: must be greater than zero".to_string())
        }
        Some(_) => {}
    }

    if !problems.is_empty() {
        return Err(problems.join("; "));
    }

    Ok((
        req.client_id.clone(),
        RateConfig {
            capacity: req.capacity.unwrap_or_default(),
            refill_rate: req.rate_per_sec.unwrap_or_default(),
        },
    ))
}

async fn create_client(
    State(store): State<Arc<dyn ConfigStore>>,
    payload: Result<Json<ClientRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return respond_error(StatusCode::BAD_REQUEST, "invalid JSON format");
    };
    let (client_id, config) = match validate(&req) {
        Ok(parsed) => parsed,
        Err(message) => return respond_error(StatusCode::UNPROCESSABLE_ENTITY, &message),
    };

    if let Err(e) = store.upsert(&client_id, config).await {
        tracing::error!(client_id = %client_id, error = %e, "failed to create client");
        return respond_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
    }

    respond_json(
        StatusCode::CREATED,
        ClientResponse {
            client_id,
            capacity: config.capacity,
            rate_per_sec: config.refill_rate,
        },
    )
}

async fn get_client(
    State(store): State<Arc<dyn ConfigStore>>,
    Path(client_id): Path<String>,
) -> Response {
    match store.get(&client_id).await {
        Ok(Some(config)) => respond_json(
            StatusCode::OK,
            ClientResponse {
                client_id,
                capacity: config.capacity,
                rate_per_sec: config.refill_rate,
            },
        ),
        Ok(None) => respond_error(StatusCode::NOT_FOUND, "client not found"),
        Err(e) => {
            tracing::error!(client_id = %client_id, error = %e, "failed to get client config");
            respond_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

async fn update_client(
    State(store): State<Arc<dyn ConfigStore>>,
    Path(client_id): Path<String>,
    payload: Result<Json<ClientRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = payload else {
        return respond_error(StatusCode::BAD_REQUEST, "invalid JSON format");
    };
    let (body_id, config) = match validate(&req) {
        Ok(parsed) => parsed,
        Err(message) => return respond_error(StatusCode::UNPROCESSABLE_ENTITY, &message),
    };
    if body_id != client_id {
        return respond_error(StatusCode::BAD_REQUEST, "client ID mismatch");
    }

    if let Err(e) = store.upsert(&client_id, config).await {
        tracing::error!(client_id = %client_id, error = %e, "failed to update client");
        return respond_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
    }

    respond_json(
        StatusCode::OK,
        ClientResponse {
            client_id,
            capacity: config.capacity,
            rate_per_sec: config.refill_rate,
        },
    )
}

async fn delete_client(
    State(store): State<Arc<dyn ConfigStore>>,
    Path(client_id): Path<String>,
) -> Response {
    if let Err(e) = store.delete(&client_id).await {
        tracing::error!(client_id = %client_id, error = %e, "failed to delete client");
        return respond_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
    }
    with_api_version(StatusCode::NO_CONTENT.into_response())
}

fn respond_json<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_api_version((status, Json(body)).into_response())
}

fn respond_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({
        "error": { "code": status.as_u16(), "message": message }
    });
    with_api_version((status, Json(body)).into_response())
}

fn with_api_version(mut response: Response) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static(API_VERSION_HEADER),
        HeaderValue::from_static(API_VERSION),
    );
    response
}
