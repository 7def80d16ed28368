//! Upload and retention services, and the state shared with handlers.

pub mod context;
pub mod sweep_service;
pub mod upload_service;

use context::TransitContext;
use sweep_service::SweepService;
use upload_service::UploadService;

/// Router state: one context shared by both services.
#[derive(Clone)]
pub struct AppState {
    pub ctx: TransitContext,
    pub uploads: UploadService,
    pub sweeper: SweepService,
}
