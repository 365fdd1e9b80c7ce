use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ProjectRequest, ProjectStatus};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ProjectStatusUpdate {
    pub status: ProjectStatus,
}

/// PATCH /api/v1/projects/:id/status
/// Filled or Cancelled stops every running campaign for the project.
pub async fn handle_set_project_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProjectStatusUpdate>,
) -> Result<Json<ProjectRequest>, AppError> {
    Ok(Json(
        state.orchestrator.set_project_status(id, req.status).await?,
    ))
}
