//! DiskStore: object payloads on local disk, metadata in SQLite.
//!
//! Payloads are sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`
//! and every committed object has one row in the `objects` table. A bucket
//! exists when its directory exists.

use super::{
    ObjectStore, ObjectStream, ObjectWriter, StoreError, StoreResult, ensure_bucket_name_safe,
    ensure_key_safe,
};
use crate::models::object::{ListPage, ObjectInfo};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::{FromRow, SqlitePool};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(FromRow, Debug)]
struct ObjectRow {
    key: String,
    size_bytes: i64,
    etag: Option<String>,
    created_at: DateTime<Utc>,
    public_read: bool,
}

impl From<ObjectRow> for ObjectInfo {
    fn from(row: ObjectRow) -> Self {
        ObjectInfo {
            key: row.key,
            size_bytes: row.size_bytes.max(0) as u64,
            etag: row.etag,
            created_at: row.created_at,
            public_read: row.public_read,
        }
    }
}

#[derive(Clone)]
pub struct DiskStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    default_bucket: String,
}

impl DiskStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        default_bucket: impl Into<String>,
    ) -> StoreResult<Self> {
        let default_bucket = default_bucket.into();
        ensure_bucket_name_safe(&default_bucket)?;
        Ok(Self {
            db,
            base_path: base_path.into(),
            default_bucket,
        })
    }

    /// Create the metadata schema if it is missing. Safe to run repeatedly.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        tracing::info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers from MD5(bucket/key), as lowercase hex.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn require_bucket(&self, bucket: &str) -> StoreResult<()> {
        ensure_bucket_name_safe(bucket)?;
        match fs::metadata(self.bucket_root(bucket)).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::BucketNotFound(bucket.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::BucketNotFound(bucket.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectRow> {
        sqlx::query_as::<_, ObjectRow>(
            "SELECT key, size_bytes, etag, created_at, public_read
             FROM objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn upsert_object(
    db: &SqlitePool,
    bucket: &str,
    key: &str,
    size_bytes: i64,
    etag: Option<&str>,
) -> StoreResult<ObjectInfo> {
    let row = sqlx::query_as::<_, ObjectRow>(
        r#"
        INSERT INTO objects (bucket, key, size_bytes, etag, created_at, public_read)
        VALUES (?, ?, ?, ?, ?, 0)
        ON CONFLICT(bucket, key) DO UPDATE SET
            size_bytes = excluded.size_bytes,
            etag = excluded.etag,
            created_at = excluded.created_at,
            public_read = 0
        RETURNING key, size_bytes, etag, created_at, public_read
        "#,
    )
    .bind(bucket)
    .bind(key)
    .bind(size_bytes)
    .bind(etag)
    .bind(Utc::now())
    .fetch_one(db)
    .await?;
    Ok(row.into())
}

fn parent_dir(path: &Path) -> StoreResult<PathBuf> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        StoreError::Io(io::Error::other("object path missing parent directory"))
    })
}

#[async_trait]
impl ObjectStore for DiskStore {
    async fn default_bucket(&self) -> StoreResult<String> {
        fs::create_dir_all(self.bucket_root(&self.default_bucket)).await?;
        Ok(self.default_bucket.clone())
    }

    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        ensure_bucket_name_safe(bucket)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;
        Ok(())
    }

    async fn open_writer(&self, bucket: &str, key: &str) -> StoreResult<Box<dyn ObjectWriter>> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;

        let final_path = self.object_path(bucket, key);
        let parent = parent_dir(&final_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&tmp_path).await?;

        Ok(Box::new(DiskWriter {
            db: self.db.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            tmp_path,
            final_path,
            file,
            size_bytes: 0,
            digest: md5::Context::new(),
            finished: false,
        }))
    }

    async fn set_public_readable(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE objects SET public_read = 1 WHERE bucket = ? AND key = ?")
                .bind(bucket)
                .bind(key)
                .execute(&*self.db)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<ListPage> {
        self.require_bucket(bucket).await?;
        let max_keys = max_keys.clamp(1, 1000);
        let fetch_limit = max_keys + 1;

        // substr() instead of LIKE: base64url tokens contain `_`.
        let mut rows = sqlx::query_as::<_, ObjectRow>(
            "SELECT key, size_bytes, etag, created_at, public_read
             FROM objects
             WHERE bucket = ? AND substr(key, 1, ?) = ? AND key > ?
             ORDER BY key ASC LIMIT ?",
        )
        .bind(bucket)
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .bind(page_token.unwrap_or(""))
        .bind(fetch_limit as i64)
        .fetch_all(&*self.db)
        .await?;

        let mut next_page_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_page_token = rows.last().map(|row| row.key.clone());
        }

        Ok(ListPage {
            objects: rows.into_iter().map(ObjectInfo::from).collect(),
            next_page_token,
        })
    }

    async fn copy(&self, bucket: &str, src: &str, dst: &str) -> StoreResult<ObjectInfo> {
        ensure_key_safe(dst)?;
        self.require_bucket(bucket).await?;
        let source = self.fetch_object(bucket, src).await?;

        let src_path = self.object_path(bucket, src);
        let dst_path = self.object_path(bucket, dst);
        fs::create_dir_all(parent_dir(&dst_path)?).await?;
        fs::copy(&src_path, &dst_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: src.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        match upsert_object(
            &self.db,
            bucket,
            dst,
            source.size_bytes,
            source.etag.as_deref(),
        )
        .await
        {
            Ok(info) => Ok(info),
            Err(err) => {
                let _ = fs::remove_file(&dst_path).await;
                Err(err)
            }
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    async fn open(&self, bucket: &str, key: &str) -> StoreResult<(ObjectInfo, ObjectStream)> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;
        let row = self.fetch_object(bucket, key).await?;
        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Io(err)
                }
            })?;
        Ok((row.into(), ReaderStream::new(file).boxed()))
    }
}

/// Streams into a temp file next to the final path; commit renames it into
/// place and records the metadata row.
struct DiskWriter {
    db: Arc<SqlitePool>,
    bucket: String,
    key: String,
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: File,
    size_bytes: i64,
    digest: md5::Context,
    finished: bool,
}

#[async_trait]
impl ObjectWriter for DiskWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.file.write_all(&chunk).await?;
        self.size_bytes += chunk.len() as i64;
        self.digest.consume(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<ObjectInfo> {
        let mut this = self;
        this.file.flush().await?;
        this.file.sync_all().await?;

        if let Err(err) = fs::rename(&this.tmp_path, &this.final_path).await {
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(StoreError::Io(err));
            }
            fs::remove_file(&this.final_path).await?;
            fs::rename(&this.tmp_path, &this.final_path).await?;
        }
        this.finished = true;

        let digest = std::mem::replace(&mut this.digest, md5::Context::new());
        let etag = format!("{:x}", digest.compute());
        match upsert_object(
            &this.db,
            &this.bucket,
            &this.key,
            this.size_bytes,
            Some(&etag),
        )
        .await
        {
            Ok(info) => Ok(info),
            Err(err) => {
                let _ = fs::remove_file(&this.final_path).await;
                Err(err)
            }
        }
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn scratch_store() -> DiskStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let dir = std::env::temp_dir().join(format!("file-transit-disk-{}", Uuid::new_v4()));
        let store = DiskStore::new(Arc::new(pool), dir, "bucket-a").unwrap();
        store.migrate().await.unwrap();
        store.default_bucket().await.unwrap();
        store
    }

    async fn put(store: &DiskStore, key: &str, chunks: &[&'static str]) -> ObjectInfo {
        let mut writer = store.open_writer("bucket-a", key).await.unwrap();
        for chunk in chunks {
            writer.write_chunk(Bytes::from_static(chunk.as_bytes())).await.unwrap();
        }
        writer.commit().await.unwrap()
    }

    async fn read_all(store: &DiskStore, key: &str) -> Vec<u8> {
        let (_, body) = store.open("bucket-a", key).await.unwrap();
        let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn write_commit_and_read_back() {
        let store = scratch_store().await;
        let info = put(&store, "live/cs101/tok/notes.txt", &["hello ", "world"]).await;
        assert_eq!(info.size_bytes, 11);
        assert_eq!(
            info.etag.as_deref(),
            Some(format!("{:x}", md5::compute(b"hello world")).as_str())
        );
        assert!(!info.public_read);
        assert_eq!(read_all(&store, "live/cs101/tok/notes.txt").await, b"hello world");
    }

    #[tokio::test]
    async fn dropped_writer_leaves_no_object() {
        let store = scratch_store().await;
        let mut writer = store
            .open_writer("bucket-a", "live/cs101/tok/partial.bin")
            .await
            .unwrap();
        writer.write_chunk(Bytes::from_static(b"half")).await.unwrap();
        drop(writer);

        let page = store.list("bucket-a", "live/", None, 10).await.unwrap();
        assert!(page.objects.is_empty());
    }

    #[tokio::test]
    async fn public_flag_is_persisted() {
        let store = scratch_store().await;
        put(&store, "live/a/tok/x", &["1"]).await;
        store
            .set_public_readable("bucket-a", "live/a/tok/x")
            .await
            .unwrap();
        let (info, _) = store.open("bucket-a", "live/a/tok/x").await.unwrap();
        assert!(info.public_read);
        assert!(matches!(
            store.set_public_readable("bucket-a", "live/a/tok/y").await,
            Err(StoreError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_paginated() {
        let store = scratch_store().await;
        for key in ["live/a/t_1/x", "live/a/t_2/x", "live/b/t3/x", "trash/a/t_1/x"] {
            put(&store, key, &["1"]).await;
        }
        // `_` must not act as a wildcard.
        let page = store.list("bucket-a", "live/a/t_", None, 10).await.unwrap();
        assert_eq!(page.objects.len(), 2);

        let first = store.list("bucket-a", "live/", None, 2).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        let token = first.next_page_token.expect("second page");
        let second = store
            .list("bucket-a", "live/", Some(&token), 2)
            .await
            .unwrap();
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["live/b/t3/x"]);
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn copy_then_delete_relocates_payload() {
        let store = scratch_store().await;
        put(&store, "live/cs101/abc/notes.txt", &["0123456789"]).await;

        let copy = store
            .copy("bucket-a", "live/cs101/abc/notes.txt", "trash/cs101/abc/notes.txt")
            .await
            .unwrap();
        assert_eq!(copy.size_bytes, 10);
        store
            .delete("bucket-a", "live/cs101/abc/notes.txt")
            .await
            .unwrap();

        assert_eq!(read_all(&store, "trash/cs101/abc/notes.txt").await, b"0123456789");
        assert!(matches!(
            store.open("bucket-a", "live/cs101/abc/notes.txt").await,
            Err(StoreError::ObjectNotFound { .. })
        ));
        assert!(!store.object_path("bucket-a", "live/cs101/abc/notes.txt").exists());
    }

    #[tokio::test]
    async fn missing_bucket_is_reported_until_ensured() {
        let store = scratch_store().await;
        assert!(matches!(
            store.list("bucket-b", "live/", None, 10).await,
            Err(StoreError::BucketNotFound(_))
        ));

        store.ensure_bucket("bucket-b").await.unwrap();
        let page = store.list("bucket-b", "live/", None, 10).await.unwrap();
        assert!(page.objects.is_empty());
        assert!(matches!(
            store.ensure_bucket("../escape").await,
            Err(StoreError::InvalidBucketName { .. })
        ));
    }
}
