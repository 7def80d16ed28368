//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks bucket resolution and listing

use crate::{models::key::LIVE_PREFIX, services::AppState, store::with_deadline};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Always 200. Never touches the store.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Resolves the bucket.
/// 2. Lists a single key under `live/`.
///
/// HTTP 200 when both pass, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = HashMap::new();

    let bucket = match state.ctx.bucket().await {
        Ok(bucket) => {
            checks.insert("bucket", CheckStatus::ok());
            Some(bucket)
        }
        Err(err) => {
            checks.insert("bucket", CheckStatus::failed(err.to_string()));
            None
        }
    };

    let list_check = match &bucket {
        Some(bucket) => {
            match with_deadline(
                state.ctx.store_timeout,
                state.ctx.store.list(bucket, LIVE_PREFIX, None, 1),
            )
            .await
            {
                Ok(_) => CheckStatus::ok(),
                Err(err) => CheckStatus::failed(format!("error: {}", err)),
            }
        }
        None => CheckStatus::failed("bucket unavailable".to_string()),
    };
    checks.insert("list", list_check);

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
