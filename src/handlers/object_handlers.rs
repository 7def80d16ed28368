//! Public object downloads.
//! Streams object bodies to avoid buffering in memory; only objects marked
//! publicly readable are served.

use crate::{models::object::ObjectInfo, services::AppState, store::StoreError};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::error;

/// `GET /{bucket}/{*key}`
pub async fn get_public_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    match state.ctx.store.open(&bucket, &key).await {
        Ok((meta, body)) if meta.public_read => {
            let mut response = Response::new(Body::from_stream(body));
            set_object_headers(response.headers_mut(), &meta);
            response
        }
        Ok(_)
        | Err(StoreError::ObjectNotFound { .. })
        | Err(StoreError::BucketNotFound(_))
        | Err(StoreError::InvalidBucketName { .. })
        | Err(StoreError::InvalidObjectKey(_)) => {
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(err) => {
            error!(bucket = %bucket, key = %key, error = %err, "reading public object failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Could not read file").into_response()
        }
    }
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes));

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.created_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
