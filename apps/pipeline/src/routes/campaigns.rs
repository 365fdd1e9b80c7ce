use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::{AppError, PipelineError};
use crate::models::{Campaign, CampaignStatus, CandidateRecord, ProjectRequest};
use crate::pipeline::Orchestrator;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub title: String,
    /// Skill tag -> weight.
    pub required_skills: BTreeMap<String, f64>,
    #[serde(default)]
    pub min_experience_years: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub max_leads: Option<u32>,
}

impl CreateCampaignRequest {
    fn into_project(self) -> ProjectRequest {
        let mut project = ProjectRequest::new(self.title, &[]);
        project.required_skills = self.required_skills;
        project.min_experience_years = self.min_experience_years;
        project.location = self.location;
        project.max_leads = self.max_leads;
        project
    }
}

#[derive(Serialize)]
pub struct ExpireResponse {
    pub campaign_id: Uuid,
    pub expired: u32,
}

/// Runs the campaign in the background. A run already in flight is left alone.
fn spawn_run(orchestrator: Orchestrator, campaign_id: Uuid) {
    tokio::spawn(async move {
        match orchestrator.run_campaign(campaign_id).await {
            Ok(campaign) => info!(
                campaign_id = %campaign_id,
                status = ?campaign.status,
                "Run finished"
            ),
            Err(PipelineError::AlreadyRunning(_)) => {}
            Err(e) => error!(campaign_id = %campaign_id, "Run failed: {e}"),
        }
    });
}

/// POST /api/v1/campaigns
pub async fn handle_start_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Campaign>), AppError> {
    let campaign = state.orchestrator.start_campaign(req.into_project()).await?;
    spawn_run(state.orchestrator.clone(), campaign.id);
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

/// GET /api/v1/campaigns/:id
pub async fn handle_get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.orchestrator.campaign_summary(id).await?))
}

/// GET /api/v1/campaigns/:id/candidates
pub async fn handle_list_candidates(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CandidateRecord>>, AppError> {
    // 404 for unknown campaigns rather than an empty list.
    state.orchestrator.campaign_summary(id).await?;
    Ok(Json(state.repo.list_by_campaign(id).await?))
}

/// POST /api/v1/campaigns/:id/cancel
pub async fn handle_cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, AppError> {
    Ok(Json(state.orchestrator.cancel_campaign(id).await?))
}

/// POST /api/v1/campaigns/:id/resume
pub async fn handle_resume_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Campaign>), AppError> {
    let campaign = state.orchestrator.campaign_summary(id).await?;
    if matches!(
        campaign.status,
        CampaignStatus::Completed | CampaignStatus::Cancelled
    ) {
        return Err(AppError::Conflict(format!(
            "campaign {id} is {:?}",
            campaign.status
        )));
    }
    spawn_run(state.orchestrator.clone(), id);
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

/// POST /api/v1/campaigns/:id/expire
pub async fn handle_expire_unanswered(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExpireResponse>, AppError> {
    state.orchestrator.campaign_summary(id).await?;
    let expired = state.orchestrator.expire_unanswered(id, Utc::now()).await?;
    Ok(Json(ExpireResponse {
        campaign_id: id,
        expired,
    }))
}
