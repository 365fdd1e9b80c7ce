use async_trait::async_trait;
use serde::Serialize;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::{
    Campaign, CampaignStatus, CandidateRecord, DedupKey, OutreachMessage, ProjectRequest, Stage,
};
use crate::store::{InsertOutcome, MergeRecord, Repository};

/// PostgreSQL repository. The `UNIQUE (campaign_id, dedup_key)` constraint plus
/// `ON CONFLICT DO NOTHING` makes dedup registration an atomic upsert.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Text form of a snake_case unit enum, as stored in the indexed status columns.
fn enum_text<T: Serialize>(value: &T) -> Result<String, PipelineError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(PipelineError::Storage(format!(
            "expected a unit enum, got {other}"
        ))),
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn insert_if_absent(
        &self,
        record: CandidateRecord,
    ) -> Result<InsertOutcome, PipelineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO candidates (id, campaign_id, dedup_key, stage, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (campaign_id, dedup_key) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.campaign_id)
        .bind(record.dedup_key.as_str())
        .bind(record.stage.as_str())
        .bind(Json(&record))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted(record));
        }

        debug!(
            "Dedup key {} already taken in campaign {}",
            record.dedup_key, record.campaign_id
        );
        self.find_by_dedup_key(record.campaign_id, &record.dedup_key)
            .await?
            .map(InsertOutcome::Existing)
            .ok_or_else(|| {
                PipelineError::Storage(format!(
                    "conflict on dedup key {} but no holder found",
                    record.dedup_key
                ))
            })
    }

    async fn save(&self, record: &CandidateRecord) -> Result<(), PipelineError> {
        let result = sqlx::query(
            r#"
            UPDATE candidates
            SET stage = $2, data = $3, updated_at = $4
            WHERE id = $1 AND dedup_key = $5
            "#,
        )
        .bind(record.id)
        .bind(record.stage.as_str())
        .bind(Json(record))
        .bind(record.updated_at)
        .bind(record.dedup_key.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.find_by_id(record.id).await? {
            Some(_) => Err(PipelineError::Validation(format!(
                "dedup key of candidate {} cannot change",
                record.id
            ))),
            None => Err(PipelineError::NotFound(format!("candidate {}", record.id))),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CandidateRecord>, PipelineError> {
        let row: Option<Json<CandidateRecord>> =
            sqlx::query_scalar("SELECT data FROM candidates WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(r)| r))
    }

    async fn find_by_dedup_key(
        &self,
        campaign_id: Uuid,
        key: &DedupKey,
    ) -> Result<Option<CandidateRecord>, PipelineError> {
        let row: Option<Json<CandidateRecord>> = sqlx::query_scalar(
            "SELECT data FROM candidates WHERE campaign_id = $1 AND dedup_key = $2",
        )
        .bind(campaign_id)
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(r)| r))
    }

    async fn list_by_stage(
        &self,
        campaign_id: Uuid,
        stage: Stage,
    ) -> Result<Vec<CandidateRecord>, PipelineError> {
        let rows: Vec<Json<CandidateRecord>> = sqlx::query_scalar(
            r#"
            SELECT data FROM candidates
            WHERE campaign_id = $1 AND stage = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(campaign_id)
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(r)| r).collect())
    }

    async fn list_by_campaign(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<CandidateRecord>, PipelineError> {
        let rows: Vec<Json<CandidateRecord>> = sqlx::query_scalar(
            "SELECT data FROM candidates WHERE campaign_id = $1 ORDER BY created_at, id",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(r)| r).collect())
    }

    async fn record_merge(&self, merge: &MergeRecord) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO candidate_merges (id, campaign_id, candidate_id, data, merged_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(merge.id)
        .bind(merge.campaign_id)
        .bind(merge.candidate_id)
        .bind(Json(merge))
        .bind(merge.merged_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merges_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<MergeRecord>, PipelineError> {
        let rows: Vec<Json<MergeRecord>> = sqlx::query_scalar(
            "SELECT data FROM candidate_merges WHERE candidate_id = $1 ORDER BY merged_at",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(m)| m).collect())
    }

    async fn save_project(&self, project: &ProjectRequest) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, status, data, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data
            "#,
        )
        .bind(project.id)
        .bind(enum_text(&project.status)?)
        .bind(Json(project))
        .bind(project.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_project(&self, id: Uuid) -> Result<Option<ProjectRequest>, PipelineError> {
        let row: Option<Json<ProjectRequest>> =
            sqlx::query_scalar("SELECT data FROM projects WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(p)| p))
    }

    async fn save_campaign(&self, campaign: &Campaign) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, project_id, status, data, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status, data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(campaign.id)
        .bind(campaign.project_id)
        .bind(enum_text(&campaign.status)?)
        .bind(Json(campaign))
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_campaign(&self, id: Uuid) -> Result<Option<Campaign>, PipelineError> {
        let row: Option<Json<Campaign>> =
            sqlx::query_scalar("SELECT data FROM campaigns WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(c)| c))
    }

    async fn campaigns_with_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, PipelineError> {
        let rows: Vec<Json<Campaign>> =
            sqlx::query_scalar("SELECT data FROM campaigns WHERE status = $1")
                .bind(enum_text(&status)?)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|Json(c)| c).collect())
    }

    async fn campaigns_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Campaign>, PipelineError> {
        let rows: Vec<Json<Campaign>> =
            sqlx::query_scalar("SELECT data FROM campaigns WHERE project_id = $1")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|Json(c)| c).collect())
    }

    async fn save_message(&self, message: &OutreachMessage) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO outreach_messages (id, candidate_id, campaign_id, status, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data
            "#,
        )
        .bind(message.id)
        .bind(message.candidate_id)
        .bind(message.campaign_id)
        .bind(enum_text(&message.status)?)
        .bind(Json(message))
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn messages_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<OutreachMessage>, PipelineError> {
        let rows: Vec<Json<OutreachMessage>> = sqlx::query_scalar(
            "SELECT data FROM outreach_messages WHERE candidate_id = $1 ORDER BY created_at",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(m)| m).collect())
    }
}
