//! The object store capability and its backends.
//!
//! Upload and sweep logic only ever talk to [`ObjectStore`]; the backend is
//! picked once at startup from configuration.

use crate::models::object::{ListPage, ObjectInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{future::Future, io, time::Duration};
use thiserror::Error;

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Byte stream handed back when reading an object.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("store call exceeded {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-addressed blob storage.
///
/// Every object gets its `created_at` from the store when it is committed
/// or copied. There is no move or update-in-place primitive.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// The bucket this process writes to when none is configured.
    async fn default_bucket(&self) -> StoreResult<String>;

    /// Validate `bucket` and create it if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()>;

    /// Start writing an object. Nothing is visible until [`ObjectWriter::commit`].
    async fn open_writer(&self, bucket: &str, key: &str) -> StoreResult<Box<dyn ObjectWriter>>;

    async fn set_public_readable(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// List objects whose key starts with `prefix`, in key order.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<ListPage>;

    /// Copy `src` to `dst`. The copy is a new object: fresh `created_at`,
    /// not public.
    async fn copy(&self, bucket: &str, src: &str, dst: &str) -> StoreResult<ObjectInfo>;

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()>;

    async fn open(&self, bucket: &str, key: &str) -> StoreResult<(ObjectInfo, ObjectStream)>;
}

/// An in-progress object write.
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()>;

    /// Make the object visible under its key.
    async fn commit(self: Box<Self>) -> StoreResult<ObjectInfo>;
}

/// Bound a store call by `limit`, surfacing an elapsed deadline as
/// [`StoreError::Timeout`].
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

pub(crate) const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Basic key validation shared by every backend.
///
/// Rejects empty keys, a leading `/`, empty or dot-only segments, and
/// control characters or backslashes anywhere.
pub(crate) fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = || StoreError::InvalidObjectKey(key.to_string());
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN || key.starts_with('/') {
        return Err(invalid());
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid());
    }
    if key.chars().any(|c| c.is_control() || c == '\\') {
        return Err(invalid());
    }
    Ok(())
}

/// Validate bucket name format.
///
/// S3-like rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub(crate) fn ensure_bucket_name_safe(name: &str) -> StoreResult<()> {
    let reject = |reason: &str| {
        Err(StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return reject("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return reject("allowed characters are lowercase letters, digits, dots, and hyphens");
    }
    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return reject("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return reject("cannot contain consecutive dots or dot-hyphen combinations");
    }
    if is_ipv4_like(name) {
        return reject("must not be formatted like an IP address");
    }
    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
