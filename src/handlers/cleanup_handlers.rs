//! Retention sweep trigger for an external scheduler.

use crate::{errors::TransitError, services::AppState};
use axum::{extract::State, http::StatusCode};

/// Any method on `/cleanup-task`.
///
/// 200 with a one-line summary once the sweep finishes; per-object failures
/// are counted, not fatal. A listing failure surfaces as 500.
pub async fn cleanup_task(
    State(state): State<AppState>,
) -> Result<(StatusCode, String), TransitError> {
    let report = state.sweeper.sweep().await?;
    Ok((
        StatusCode::OK,
        format!(
            "scanned={} relocated={} retained={} skipped={} failed={}\n",
            report.scanned, report.relocated, report.retained, report.skipped, report.failed
        ),
    ))
}
