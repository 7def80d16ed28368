//! Defines routes for the upload, cleanup, and download endpoints.
//!
//! ## Structure
//! - `GET  /`              - upload form
//! - `POST /upload`        - multipart upload, 302 to the public URL
//! - `ANY  /cleanup-task`  - retention sweep, for an external scheduler
//! - `GET  /{bucket}/{*key}` - public object download
//! - `GET  /healthz`, `GET /readyz`
//!
//! The wildcard `*key` carries the `/`-separated object key.

use crate::{
    handlers::{
        cleanup_handlers::cleanup_task,
        health_handlers::{healthz, readyz},
        object_handlers::get_public_object,
        upload_handlers::{upload, upload_form},
    },
    services::AppState,
};
use axum::{
    Router,
    routing::{any, get, post},
};

/// Build the router; state is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(upload_form))
        .route("/upload", post(upload))
        .route("/cleanup-task", any(cleanup_task))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/{bucket}/{*key}", get(get_public_object))
}
