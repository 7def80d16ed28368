//! Fault injection around [`MemoryStore`] for service and route tests.

use crate::{
    models::object::{ListPage, ObjectInfo},
    store::{MemoryStore, ObjectStore, ObjectStream, ObjectWriter, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashSet, io};

pub const TEST_BUCKET: &str = "transit-test";

fn injected(op: &str) -> StoreError {
    StoreError::Io(io::Error::other(format!("injected {op} failure")))
}

/// Delegates to an inner [`MemoryStore`] unless told to fail.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: Option<MemoryStore>,
    /// Copies whose source key contains any of these fragments fail.
    pub fail_copy: HashSet<String>,
    pub fail_delete: bool,
    pub fail_list: bool,
    pub fail_commit: bool,
    pub fail_public: bool,
    pub fail_bucket: bool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: Some(MemoryStore::new(TEST_BUCKET).expect("valid bucket")),
            ..Self::default()
        }
    }

    fn inner(&self) -> &MemoryStore {
        self.inner.as_ref().expect("inner store")
    }
}

/// Write `body` under `key` and return what the store recorded.
pub async fn put_object(store: &dyn ObjectStore, key: &str, body: &[u8]) -> ObjectInfo {
    let mut writer = store.open_writer(TEST_BUCKET, key).await.expect("open writer");
    writer
        .write_chunk(Bytes::copy_from_slice(body))
        .await
        .expect("write");
    writer.commit().await.expect("commit")
}

pub async fn read_object(store: &dyn ObjectStore, key: &str) -> Option<Vec<u8>> {
    use futures::TryStreamExt;
    let (_, body) = store.open(TEST_BUCKET, key).await.ok()?;
    let chunks: Vec<Bytes> = body.try_collect().await.ok()?;
    Some(chunks.concat())
}

pub async fn keys_under(store: &dyn ObjectStore, prefix: &str) -> Vec<String> {
    store
        .list(TEST_BUCKET, prefix, None, 1000)
        .await
        .expect("list")
        .objects
        .into_iter()
        .map(|o| o.key)
        .collect()
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn default_bucket(&self) -> StoreResult<String> {
        if self.fail_bucket {
            return Err(injected("bucket"));
        }
        self.inner().default_bucket().await
    }

    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        if self.fail_bucket {
            return Err(injected("bucket"));
        }
        self.inner().ensure_bucket(bucket).await
    }

    async fn open_writer(&self, bucket: &str, key: &str) -> StoreResult<Box<dyn ObjectWriter>> {
        let inner = self.inner().open_writer(bucket, key).await?;
        Ok(Box::new(FlakyWriter {
            inner,
            fail_commit: self.fail_commit,
        }))
    }

    async fn set_public_readable(&self, bucket: &str, key: &str) -> StoreResult<()> {
        if self.fail_public {
            return Err(injected("acl"));
        }
        self.inner().set_public_readable(bucket, key).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<ListPage> {
        if self.fail_list {
            return Err(injected("list"));
        }
        self.inner().list(bucket, prefix, page_token, max_keys).await
    }

    async fn copy(&self, bucket: &str, src: &str, dst: &str) -> StoreResult<ObjectInfo> {
        if self.fail_copy.iter().any(|fragment| src.contains(fragment)) {
            return Err(injected("copy"));
        }
        self.inner().copy(bucket, src, dst).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        if self.fail_delete {
            return Err(injected("delete"));
        }
        self.inner().delete(bucket, key).await
    }

    async fn open(&self, bucket: &str, key: &str) -> StoreResult<(ObjectInfo, ObjectStream)> {
        self.inner().open(bucket, key).await
    }
}

struct FlakyWriter {
    inner: Box<dyn ObjectWriter>,
    fail_commit: bool,
}

#[async_trait]
impl ObjectWriter for FlakyWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.inner.write_chunk(chunk).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<ObjectInfo> {
        if self.fail_commit {
            return Err(injected("commit"));
        }
        self.inner.commit().await
    }
}
