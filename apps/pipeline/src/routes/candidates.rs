use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{CandidateRecord, OutreachMessage, ResponseSignal};
use crate::state::AppState;

#[derive(Serialize)]
pub struct CandidateDetail {
    pub candidate: CandidateRecord,
    pub messages: Vec<OutreachMessage>,
}

/// GET /api/v1/candidates/:id
pub async fn handle_get_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CandidateDetail>, AppError> {
    let candidate = state
        .repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Candidate {id} not found")))?;
    let messages = state.repo.messages_for_candidate(id).await?;
    Ok(Json(CandidateDetail {
        candidate,
        messages,
    }))
}

/// POST /api/v1/candidates/:id/response
/// Inbound reply webhook. Replaying the same signal is harmless.
pub async fn handle_record_response(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(signal): Json<ResponseSignal>,
) -> Result<Json<CandidateRecord>, AppError> {
    Ok(Json(state.orchestrator.record_response(id, signal).await?))
}
