//! Shared handles for the upload and sweep services.

use crate::{
    errors::TransitError,
    store::{ObjectStore, with_deadline},
};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

/// Store handle plus the process-wide bucket name.
///
/// The bucket is resolved on first use and cached for the life of the
/// process. Callers racing on the first resolution may each ask the store;
/// the lookup is deterministic, so whichever answer lands first is kept.
#[derive(Clone)]
pub struct TransitContext {
    pub store: Arc<dyn ObjectStore>,
    bucket_override: Option<String>,
    bucket: Arc<OnceLock<String>>,
    pub store_timeout: Duration,
}

impl TransitContext {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket_override: Option<String>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bucket_override,
            bucket: Arc::new(OnceLock::new()),
            store_timeout,
        }
    }

    pub async fn bucket(&self) -> Result<String, TransitError> {
        if let Some(name) = self.bucket.get() {
            return Ok(name.clone());
        }

        let resolved = match &self.bucket_override {
            Some(name) => {
                with_deadline(self.store_timeout, self.store.ensure_bucket(name))
                    .await
                    .map_err(TransitError::BucketResolutionFailed)?;
                name.clone()
            }
            None => with_deadline(self.store_timeout, self.store.default_bucket())
                .await
                .map_err(TransitError::BucketResolutionFailed)?,
        };
        tracing::debug!(bucket = %resolved, "resolved bucket");

        // First writer wins; a concurrent resolver computed the same name.
        Ok(self.bucket.get_or_init(|| resolved).clone())
    }
}
