//! Upload orchestration: one inbound file becomes one public object.
//!
//! The first failing step aborts the upload. A write or commit failure can
//! leave a partial object behind in the store; it is not cleaned up here.
//! Failing to mark the object public is logged and otherwise ignored.

use crate::{
    errors::TransitError,
    models::{key::ObjectKey, object::ObjectInfo},
    services::context::TransitContext,
    store::{MAX_OBJECT_KEY_LEN, StoreError, with_deadline},
};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::io;
use tracing::warn;

/// A file taken from an upload form.
pub struct FormFile<'a> {
    /// Filename declared by the client, if any.
    pub file_name: Option<String>,
    pub body: BoxStream<'a, io::Result<Bytes>>,
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub bucket: String,
    pub key: ObjectKey,
    pub object: ObjectInfo,
    /// `<public_base_url>/<bucket>/<key>` with path segments percent-encoded.
    pub url: String,
}

#[derive(Clone)]
pub struct UploadService {
    ctx: TransitContext,
    public_base_url: String,
}

impl UploadService {
    pub fn new(ctx: TransitContext, public_base_url: impl Into<String>) -> Self {
        let public_base_url = public_base_url.into().trim_end_matches('/').to_string();
        Self {
            ctx,
            public_base_url,
        }
    }

    pub async fn upload(
        &self,
        file: FormFile<'_>,
        namespace_hint: &str,
    ) -> Result<UploadReceipt, TransitError> {
        let file_name = match file.file_name.as_deref() {
            None | Some("") => return Err(TransitError::NoFileProvided),
            Some(name) => name,
        };
        check_filename(file_name)?;

        let bucket = self.ctx.bucket().await?;
        let key = ObjectKey::allocate(namespace_hint, file_name);
        let key_str = key.to_string();
        if key_str.len() > MAX_OBJECT_KEY_LEN {
            return Err(TransitError::InvalidFilename(file_name.to_string()));
        }
        let limit = self.ctx.store_timeout;
        let write_failed = |source: StoreError| TransitError::WriteFailed {
            key: key_str.clone(),
            source,
        };

        let mut writer = with_deadline(limit, self.ctx.store.open_writer(&bucket, &key_str))
            .await
            .map_err(write_failed)?;
        let mut body = file.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| write_failed(StoreError::Io(err)))?;
            with_deadline(limit, writer.write_chunk(chunk))
                .await
                .map_err(write_failed)?;
        }

        let object = with_deadline(limit, writer.commit())
            .await
            .map_err(|source| TransitError::CommitFailed {
                key: key_str.clone(),
                source,
            })?;

        if let Err(source) =
            with_deadline(limit, self.ctx.store.set_public_readable(&bucket, &key_str)).await
        {
            let err = TransitError::PublicAclFailed {
                key: key_str.clone(),
                source,
            };
            warn!(error = %err, "uploaded object is not publicly readable");
        }

        let url = public_url(&self.public_base_url, &bucket, &key_str);

        Ok(UploadReceipt {
            bucket,
            key,
            object,
            url,
        })
    }
}

/// Reject filenames that would not survive as a single key segment.
fn check_filename(name: &str) -> Result<(), TransitError> {
    let bad = name == "."
        || name == ".."
        || name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(TransitError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

pub fn public_url(base: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        encode_path(bucket),
        encode_path(key)
    )
}

/// Percent-encode each `/`-separated segment, keeping `/` as the separator.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::key::KeyState,
        store::ObjectStore,
        test_support::{FlakyStore, TEST_BUCKET, keys_under, read_object},
    };
    use futures::stream;
    use std::{sync::Arc, time::Duration};

    fn service(store: Arc<FlakyStore>) -> UploadService {
        let ctx = TransitContext::new(store, None, Duration::from_secs(5));
        UploadService::new(ctx, "https://storage.example.com/")
    }

    fn form_file(name: Option<&str>, chunks: Vec<&'static str>) -> FormFile<'static> {
        FormFile {
            file_name: name.map(str::to_string),
            body: stream::iter(
                chunks
                    .into_iter()
                    .map(|c| Ok(Bytes::from_static(c.as_bytes()))),
            )
            .boxed(),
        }
    }

    #[tokio::test]
    async fn upload_stores_public_object_under_live_namespace() {
        let store = Arc::new(FlakyStore::new());
        let uploads = service(store.clone());

        let receipt = uploads
            .upload(form_file(Some("notes.txt"), vec!["01234", "56789"]), "cs101")
            .await
            .unwrap();

        assert_eq!(receipt.key.state, KeyState::Live);
        assert_eq!(receipt.key.namespace, "cs101");
        assert_eq!(receipt.key.name, "notes.txt");
        let key = receipt.key.to_string();
        assert!(key.starts_with("live/cs101/"));
        assert!(key.ends_with("/notes.txt"));

        assert_eq!(
            read_object(store.as_ref(), &key).await.as_deref(),
            Some(&b"0123456789"[..])
        );
        assert_eq!(
            receipt.url,
            format!("https://storage.example.com/{TEST_BUCKET}/{key}")
        );
        assert!(receipt.object.size_bytes == 10);
        let (info, _) = store.open(TEST_BUCKET, &key).await.unwrap();
        assert!(info.public_read);
    }

    #[tokio::test]
    async fn reserved_namespace_is_rewritten() {
        let store = Arc::new(FlakyStore::new());
        let receipt = service(store)
            .upload(form_file(Some("a.txt"), vec!["x"]), "trash")
            .await
            .unwrap();
        assert!(receipt.key.to_string().starts_with("live/default/"));
    }

    #[tokio::test]
    async fn missing_or_empty_filename_is_no_file() {
        let store = Arc::new(FlakyStore::new());
        let uploads = service(store.clone());
        for name in [None, Some("")] {
            let err = uploads
                .upload(form_file(name, vec![]), "cs101")
                .await
                .unwrap_err();
            assert!(matches!(err, TransitError::NoFileProvided));
        }
        assert!(keys_under(store.as_ref(), "").await.is_empty());
    }

    #[tokio::test]
    async fn path_like_filenames_are_rejected() {
        let uploads = service(Arc::new(FlakyStore::new()));
        for name in ["..", ".", "../etc/passwd", "dir/file", "dir\\file", "bad\u{0}name"] {
            let err = uploads
                .upload(form_file(Some(name), vec!["x"]), "cs101")
                .await
                .unwrap_err();
            assert!(matches!(err, TransitError::InvalidFilename(_)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn acl_failure_does_not_fail_upload() {
        let store = Arc::new(FlakyStore {
            fail_public: true,
            ..FlakyStore::new()
        });
        let receipt = service(store.clone())
            .upload(form_file(Some("a.txt"), vec!["x"]), "cs101")
            .await
            .unwrap();
        let (info, _) = store
            .open(TEST_BUCKET, &receipt.key.to_string())
            .await
            .unwrap();
        assert!(!info.public_read);
    }

    #[tokio::test]
    async fn commit_failure_is_reported() {
        let store = Arc::new(FlakyStore {
            fail_commit: true,
            ..FlakyStore::new()
        });
        let err = service(store)
            .upload(form_file(Some("a.txt"), vec!["x"]), "cs101")
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::CommitFailed { .. }));
    }

    #[tokio::test]
    async fn body_error_is_a_write_failure() {
        let store = Arc::new(FlakyStore::new());
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(io::Error::other("client went away")),
        ])
        .boxed();
        let err = service(store.clone())
            .upload(
                FormFile {
                    file_name: Some("a.txt".into()),
                    body,
                },
                "cs101",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::WriteFailed { .. }));
        assert!(keys_under(store.as_ref(), "live/").await.is_empty());
    }

    #[tokio::test]
    async fn bucket_failure_is_reported() {
        let store = Arc::new(FlakyStore {
            fail_bucket: true,
            ..FlakyStore::new()
        });
        let err = service(store)
            .upload(form_file(Some("a.txt"), vec!["x"]), "cs101")
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::BucketResolutionFailed(_)));
    }

    #[tokio::test]
    async fn hostile_course_hints_are_stored_not_rejected() {
        let store = Arc::new(FlakyStore::new());
        let uploads = service(store.clone());
        for hint in ["..", ".", "cs\\101", "cs\n101"] {
            let receipt = uploads
                .upload(form_file(Some("a.txt"), vec!["x"]), hint)
                .await
                .unwrap_or_else(|err| panic!("hint {hint:?} failed: {err}"));
            assert_eq!(receipt.key.name, "a.txt");
        }
        assert_eq!(keys_under(store.as_ref(), "live/").await.len(), 4);
    }

    #[tokio::test]
    async fn overlong_key_is_a_client_error() {
        let store = Arc::new(FlakyStore::new());
        let name = "n".repeat(MAX_OBJECT_KEY_LEN);
        let err = service(store.clone())
            .upload(form_file(Some(&name), vec!["x"]), "cs101")
            .await
            .unwrap_err();
        assert!(matches!(err, TransitError::InvalidFilename(_)));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(keys_under(store.as_ref(), "").await.is_empty());
    }

    #[tokio::test]
    async fn configured_bucket_is_provisioned() {
        let store = Arc::new(FlakyStore::new());
        let ctx = TransitContext::new(
            store.clone(),
            Some("pinned-bucket".into()),
            Duration::from_secs(5),
        );
        let receipt = UploadService::new(ctx, "https://h")
            .upload(form_file(Some("a.txt"), vec!["x"]), "cs101")
            .await
            .unwrap();
        assert_eq!(receipt.bucket, "pinned-bucket");
        assert!(receipt.url.starts_with("https://h/pinned-bucket/live/cs101/"));
        let (info, _) = store
            .open("pinned-bucket", &receipt.key.to_string())
            .await
            .unwrap();
        assert!(info.public_read);
    }

    #[test]
    fn public_url_encodes_segments() {
        assert_eq!(
            public_url("https://h/", "b", "live/cs101/t-_/my notes+1.txt"),
            "https://h/b/live/cs101/t-_/my%20notes%2B1.txt"
        );
        assert_eq!(
            public_url("https://h", "b", "live/x/t/résumé.pdf"),
            "https://h/b/live/x/t/r%C3%A9sum%C3%A9.pdf"
        );
    }
}
