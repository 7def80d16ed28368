//! Metadata the object store reports about a stored object.

use chrono::{DateTime, Utc};

/// A single stored object as seen through a listing or a read.
///
/// The payload itself is never held here; the store owns the bytes and this
/// struct only describes them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full key within the bucket (e.g. `live/cs101/<token>/notes.txt`).
    pub key: String,

    /// Set by the store when the object is committed or copied.
    pub created_at: DateTime<Utc>,

    /// Size in bytes.
    pub size_bytes: u64,

    /// MD5 of the payload, lowercase hex.
    pub etag: Option<String>,

    /// Whether anonymous readers may fetch the object.
    pub public_read: bool,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,

    /// Pass back to `list` to fetch the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}
