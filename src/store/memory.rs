//! In-process object store. Nothing survives a restart.

use super::{
    ObjectStore, ObjectStream, ObjectWriter, StoreError, StoreResult, ensure_bucket_name_safe,
    ensure_key_safe,
};
use crate::models::object::{ListPage, ObjectInfo};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{collections::BTreeMap, ops::Bound, sync::Arc};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredObject {
    bytes: Bytes,
    created_at: DateTime<Utc>,
    public_read: bool,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            created_at: self.created_at,
            size_bytes: self.bytes.len() as u64,
            etag: Some(format!("{:x}", md5::compute(&self.bytes))),
            public_read: self.public_read,
        }
    }
}

type Buckets = BTreeMap<String, BTreeMap<String, StoredObject>>;

/// Object store held in a `BTreeMap` per bucket.
///
/// Only the default bucket exists; it is created on construction.
#[derive(Clone)]
pub struct MemoryStore {
    default_bucket: String,
    buckets: Arc<RwLock<Buckets>>,
}

impl MemoryStore {
    pub fn new(default_bucket: impl Into<String>) -> StoreResult<Self> {
        let default_bucket = default_bucket.into();
        ensure_bucket_name_safe(&default_bucket)?;
        let mut buckets = BTreeMap::new();
        buckets.insert(default_bucket.clone(), BTreeMap::new());
        Ok(Self {
            default_bucket,
            buckets: Arc::new(RwLock::new(buckets)),
        })
    }

    fn not_found(bucket: &str, key: &str) -> StoreError {
        StoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn default_bucket(&self) -> StoreResult<String> {
        Ok(self.default_bucket.clone())
    }

    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        ensure_bucket_name_safe(bucket)?;
        self.buckets
            .write()
            .await
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn open_writer(&self, bucket: &str, key: &str) -> StoreResult<Box<dyn ObjectWriter>> {
        ensure_key_safe(key)?;
        if !self.buckets.read().await.contains_key(bucket) {
            return Err(StoreError::BucketNotFound(bucket.to_string()));
        }
        Ok(Box::new(MemoryWriter {
            buckets: self.buckets.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            buf: BytesMut::new(),
        }))
    }

    async fn set_public_readable(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let object = objects
            .get_mut(key)
            .ok_or_else(|| Self::not_found(bucket, key))?;
        object.public_read = true;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<ListPage> {
        let max_keys = max_keys.clamp(1, 1000);
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

        let lower = match page_token {
            Some(token) if token >= prefix => Bound::Excluded(token.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };
        let mut matched = objects
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(max_keys + 1)
            .map(|(key, obj)| obj.info(key))
            .collect::<Vec<_>>();

        let mut next_page_token = None;
        if matched.len() > max_keys {
            matched.truncate(max_keys);
            next_page_token = matched.last().map(|o| o.key.clone());
        }

        Ok(ListPage {
            objects: matched,
            next_page_token,
        })
    }

    async fn copy(&self, bucket: &str, src: &str, dst: &str) -> StoreResult<ObjectInfo> {
        ensure_key_safe(dst)?;
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let source = objects
            .get(src)
            .ok_or_else(|| Self::not_found(bucket, src))?;
        let copied = StoredObject {
            bytes: source.bytes.clone(),
            created_at: Utc::now(),
            public_read: false,
        };
        let info = copied.info(dst);
        objects.insert(dst.to_string(), copied);
        Ok(info)
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(bucket, key))
    }

    async fn open(&self, bucket: &str, key: &str) -> StoreResult<(ObjectInfo, ObjectStream)> {
        let buckets = self.buckets.read().await;
        let object = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .get(key)
            .ok_or_else(|| Self::not_found(bucket, key))?;
        let body: ObjectStream =
            stream::once(futures::future::ready(Ok(object.bytes.clone()))).boxed();
        Ok((object.info(key), body))
    }
}

struct MemoryWriter {
    buckets: Arc<RwLock<Buckets>>,
    bucket: String,
    key: String,
    buf: BytesMut,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<ObjectInfo> {
        let MemoryWriter {
            buckets,
            bucket,
            key,
            buf,
        } = *self;
        let object = StoredObject {
            bytes: buf.freeze(),
            created_at: Utc::now(),
            public_read: false,
        };
        let info = object.info(&key);
        let mut buckets = buckets.write().await;
        buckets
            .get_mut(&bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.clone()))?
            .insert(key, object);
        Ok(info)
    }
}
