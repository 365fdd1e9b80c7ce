pub mod campaigns;
pub mod candidates;
pub mod health;
pub mod projects;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Campaigns
        .route("/api/v1/campaigns", post(campaigns::handle_start_campaign))
        .route("/api/v1/campaigns/:id", get(campaigns::handle_get_campaign))
        .route(
            "/api/v1/campaigns/:id/candidates",
            get(campaigns::handle_list_candidates),
        )
        .route(
            "/api/v1/campaigns/:id/cancel",
            post(campaigns::handle_cancel_campaign),
        )
        .route(
            "/api/v1/campaigns/:id/resume",
            post(campaigns::handle_resume_campaign),
        )
        .route(
            "/api/v1/campaigns/:id/expire",
            post(campaigns::handle_expire_unanswered),
        )
        // Candidates
        .route("/api/v1/candidates/:id", get(candidates::handle_get_candidate))
        .route(
            "/api/v1/candidates/:id/response",
            post(candidates::handle_record_response),
        )
        // Projects
        .route(
            "/api/v1/projects/:id/status",
            patch(projects::handle_set_project_status),
        )
        .with_state(state)
}
