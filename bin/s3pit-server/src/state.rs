//! Application state shared across handlers and middleware.

use crate::delay::DelayConfig;
use s3pit_auth::{SigV4Verifier, TenantRegistry};
use s3pit_storage::TenantStoreRouter;
use std::sync::Arc;

/// Everything a handler or middleware layer needs to serve a request.
pub struct AppState {
    pub registry: Arc<TenantRegistry>,
    pub store_router: Arc<TenantStoreRouter>,
    pub verifier: Arc<SigV4Verifier>,
    pub auto_create_bucket: bool,
    pub delay: DelayConfig,
}
