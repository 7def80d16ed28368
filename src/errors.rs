use crate::store::StoreError;
use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Every way an upload or a sweep can fail.
///
/// Variants carry the operation context and the underlying store error for
/// the server log. Clients only ever see [`TransitError::public_message`].
#[derive(Debug, Error)]
pub enum TransitError {
    #[error("no file field in upload form")]
    NoFileProvided,
    #[error("upload form could not be parsed: {0}")]
    MalformedForm(String),
    #[error("filename `{0}` is not allowed")]
    InvalidFilename(String),
    #[error("resolving default bucket: {0}")]
    BucketResolutionFailed(#[source] StoreError),
    #[error("initializing object store client: {0}")]
    StoreClientInitFailed(String),
    #[error("writing `{key}`: {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("committing `{key}`: {source}")]
    CommitFailed {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("making `{key}` public: {source}")]
    PublicAclFailed {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("listing `{prefix}`: {source}")]
    ListingFailed {
        prefix: String,
        #[source]
        source: StoreError,
    },
    #[error("relocating `{src}` to `{dst}`: {source}")]
    RelocationFailed {
        src: String,
        dst: String,
        #[source]
        source: StoreError,
    },
}

impl TransitError {
    pub fn status(&self) -> StatusCode {
        match self {
            TransitError::NoFileProvided
            | TransitError::MalformedForm(_)
            | TransitError::InvalidFilename(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Fixed text shown to HTTP callers. Never includes store error detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            TransitError::NoFileProvided => "No file uploaded",
            TransitError::MalformedForm(_) => "Malformed upload form",
            TransitError::InvalidFilename(_) => "Filename is not allowed",
            TransitError::BucketResolutionFailed(_) => "Failed to get default storage bucket name",
            TransitError::StoreClientInitFailed(_) => "Failed to create storage client",
            TransitError::WriteFailed { .. } => "Could not write file to storage",
            TransitError::CommitFailed { .. } => "Could not store file",
            TransitError::PublicAclFailed { .. } => "Could not publish file",
            TransitError::ListingFailed { .. } => "Failure while iterating through the bucket",
            TransitError::RelocationFailed { .. } => "Could not move file to trash",
        }
    }
}

impl IntoResponse for TransitError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::info!(error = %self, "rejected request");
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.public_message(),
        )
            .into_response()
    }
}
