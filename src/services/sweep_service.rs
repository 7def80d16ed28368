//! Retention sweep: demote live objects older than the retention window.
//!
//! A relocation is copy-then-delete. A failed copy leaves the source live
//! and the sweep moves on; a failed delete after a successful copy means the
//! next sweep copies again, which only duplicates into trash. Only a listing
//! failure aborts the sweep.

use crate::{
    errors::TransitError,
    models::{
        key::{KeyState, LIVE_PREFIX, ObjectKey},
        object::ObjectInfo,
    },
    services::context::TransitContext,
    store::{StoreError, with_deadline},
};
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use std::time::{Duration, Instant};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default listing page size.
pub const SWEEP_PAGE_SIZE: usize = 500;

/// Per-sweep counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Live objects seen.
    pub scanned: u64,
    /// Moved to trash.
    pub relocated: u64,
    /// Younger than the retention window.
    pub retained: u64,
    /// Keys under `live/` that are not transit keys.
    pub skipped: u64,
    /// Copy or delete failed; retried on the next sweep.
    pub failed: u64,
}

#[derive(Clone)]
pub struct SweepService {
    ctx: TransitContext,
    retention: TimeDelta,
    concurrency: usize,
    page_size: usize,
}

impl SweepService {
    pub fn new(ctx: TransitContext, retention: TimeDelta, concurrency: usize) -> Self {
        Self {
            ctx,
            retention,
            concurrency: concurrency.max(1),
            page_size: SWEEP_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn sweep(&self) -> Result<SweepReport, TransitError> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep treating `now` as the current time.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, TransitError> {
        let started = Instant::now();
        let bucket = self.ctx.bucket().await?;
        let limit = self.ctx.store_timeout;
        let mut report = SweepReport::default();
        let mut page_token: Option<String> = None;

        loop {
            let page = with_deadline(
                limit,
                self.ctx
                    .store
                    .list(&bucket, LIVE_PREFIX, page_token.as_deref(), self.page_size),
            )
            .await
            .map_err(|source| TransitError::ListingFailed {
                prefix: LIVE_PREFIX.to_string(),
                source,
            })?;

            report.scanned += page.objects.len() as u64;
            let mut due = Vec::new();
            for object in &page.objects {
                if !self.is_expired(object, now) {
                    report.retained += 1;
                    continue;
                }
                match ObjectKey::parse(&object.key) {
                    Ok(key) => due.push(key),
                    Err(err) => {
                        warn!(key = %object.key, error = %err, "skipping foreign key under live/");
                        report.skipped += 1;
                    }
                }
            }

            let outcomes: Vec<Result<(), TransitError>> = stream::iter(due)
                .map(|key| self.relocate(&bucket, key))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            for outcome in outcomes {
                match outcome {
                    Ok(()) => report.relocated += 1,
                    Err(err) => {
                        warn!(error = %err, "relocation failed; object stays live");
                        report.failed += 1;
                    }
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(
            bucket = %bucket,
            scanned = report.scanned,
            relocated = report.relocated,
            retained = report.retained,
            skipped = report.skipped,
            failed = report.failed,
            duration_secs = started.elapsed().as_secs_f64(),
            "retention sweep completed"
        );
        Ok(report)
    }

    /// Strictly older than the window; an object exactly at the window stays.
    fn is_expired(&self, object: &ObjectInfo, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(object.created_at) > self.retention
    }

    async fn relocate(&self, bucket: &str, key: ObjectKey) -> Result<(), TransitError> {
        let limit = self.ctx.store_timeout;
        let src = key.to_string();
        let dst = key.with_state(KeyState::Trash).to_string();
        let failed = |source: StoreError| TransitError::RelocationFailed {
            src: src.clone(),
            dst: dst.clone(),
            source,
        };

        with_deadline(limit, self.ctx.store.copy(bucket, &src, &dst))
            .await
            .map_err(failed)?;
        with_deadline(limit, self.ctx.store.delete(bucket, &src))
            .await
            .map_err(failed)?;

        debug!(src = %src, dst = %dst, "moved to trash");
        Ok(())
    }

    /// Sweep every `period` until the task is aborted. Failures are logged
    /// and the next tick tries again.
    pub fn spawn_periodic(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep().await {
                    error!(error = %err, "scheduled retention sweep failed");
                }
            }
        })
    }
}
