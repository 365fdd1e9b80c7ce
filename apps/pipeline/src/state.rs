use std::sync::Arc;

use crate::pipeline::Orchestrator;
use crate::store::Repository;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Read side for candidate and message lookups.
    pub repo: Arc<dyn Repository>,
}
