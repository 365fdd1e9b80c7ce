// Per-candidate stage steps. Each step owns the record it is given, persists every
// transition before taking the next one, and leaves error classification to
// `Orchestrator::settle`.

use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::models::{CandidateRecord, MessageStatus, OutreachMessage, ProjectRequest, Stage};
use crate::outreach::prompts::{build_outreach_prompt, OUTREACH_SYSTEM};
use crate::outreach::OutreachScheduler;
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::state;

/// A drafted message cleared for sending.
pub(crate) struct SendTicket {
    pub message: OutreachMessage,
}

/// Discovered/Deduplicated/Evaluated -> Enriched, or Rejected below the score floor.
pub(crate) async fn advance_to_enriched(
    orch: &Orchestrator,
    record: &mut CandidateRecord,
    project: &ProjectRequest,
) -> Result<(), PipelineError> {
    loop {
        orch.check_cancelled(record.campaign_id)?;

        match record.stage {
            // Records only exist once the dedup index accepted them.
            Stage::Discovered => {
                state::apply(record, Stage::Deduplicated)?;
            }
            Stage::Deduplicated => {
                let score = orch.scorer.evaluate(record, project)?;
                let value = score.value;
                record.score = Some(score);

                let floor = orch.config.score_floor;
                if value < floor {
                    state::reject(record, format!("score {value:.2} below floor {floor:.2}"))?;
                    orch.repo.save(record).await?;
                    return Ok(());
                }
                state::apply(record, Stage::Evaluated)?;
            }
            Stage::Evaluated => {
                enrich(orch, record, project).await?;
                state::apply(record, Stage::Enriched)?;
            }
            _ => return Ok(()),
        }
        orch.repo.save(record).await?;
    }
}

fn needs_enrichment(record: &CandidateRecord) -> bool {
    record.contact.email.is_none() || record.experience_years.is_none() || record.headline.is_none()
}

/// Fills missing profile fields from the scraper and rescores. A failed scrape is skipped
/// unless enrichment is required; deferrals always propagate so the candidate is parked.
async fn enrich(
    orch: &Orchestrator,
    record: &mut CandidateRecord,
    project: &ProjectRequest,
) -> Result<(), PipelineError> {
    if !needs_enrichment(record) {
        return Ok(());
    }
    let Some(url) = record.contact.profile_url.clone() else {
        return Ok(());
    };

    let scraper = orch.collaborators.scraper.clone();
    let result = orch
        .executors
        .scraping
        .run_for(record, || {
            let scraper = scraper.clone();
            let url = url.clone();
            async move { scraper.enrich(&url).await }
        })
        .await;

    match result {
        Ok(patch) => {
            record.apply_patch(patch);
            // The score stays informational here; the floor was applied at evaluation.
            record.score = Some(orch.scorer.evaluate(record, project)?);
            Ok(())
        }
        Err(e) if e.is_deferral() || orch.config.enrichment_required => Err(e),
        Err(e) => {
            warn!(candidate_id = %record.id, "Enrichment skipped: {e}");
            Ok(())
        }
    }
}

/// Prioritized -> MessageDrafted. A draft saved before a restart is reused, so generation
/// runs at most once per successful draft.
pub(crate) async fn draft_message(
    orch: &Orchestrator,
    record: &mut CandidateRecord,
    project: &ProjectRequest,
) -> Result<(), PipelineError> {
    orch.check_cancelled(record.campaign_id)?;

    let existing = orch
        .repo
        .messages_for_candidate(record.id)
        .await?
        .into_iter()
        .rev()
        .find(|m| m.status == MessageStatus::Draft);

    let channel = match existing {
        Some(draft) => draft.channel,
        None => {
            let (channel, recipient) = OutreachScheduler::choose_channel(record)?;
            let prompt = build_outreach_prompt(record, project, channel);
            let generator = orch.collaborators.generator.clone();
            let content = orch
                .executors
                .generation
                .run_for(record, || {
                    let generator = generator.clone();
                    let prompt = prompt.clone();
                    async move { generator.generate(&prompt, OUTREACH_SYSTEM).await }
                })
                .await?;

            let message = OutreachMessage::draft(
                record.id,
                record.campaign_id,
                channel,
                recipient,
                content.trim().to_string(),
            );
            orch.repo.save_message(&message).await?;
            channel
        }
    };

    record.channel = Some(channel);
    state::apply(record, Stage::MessageDrafted)?;
    orch.repo.save(record).await
}

/// Looks up the draft to send. A message already dispatched before a restart only
/// completes the transition, so nothing is sent twice.
pub(crate) async fn prepare_send(
    orch: &Orchestrator,
    record: &mut CandidateRecord,
) -> Result<Option<SendTicket>, PipelineError> {
    let messages = orch.repo.messages_for_candidate(record.id).await?;

    if messages.iter().any(OutreachMessage::is_dispatched) {
        state::apply(record, Stage::Outreached)?;
        orch.repo.save(record).await?;
        info!(candidate_id = %record.id, "Outreach already dispatched, not re-sending");
        return Ok(None);
    }

    let message = messages
        .into_iter()
        .rev()
        .find(|m| m.status == MessageStatus::Draft)
        .ok_or_else(|| {
            PipelineError::Validation(format!("candidate {} has no drafted message", record.id))
        })?;
    Ok(Some(SendTicket { message }))
}

/// MessageDrafted -> Outreached. The message is marked Sent before the stage moves.
pub(crate) async fn send_message(
    orch: &Orchestrator,
    record: &mut CandidateRecord,
    mut message: OutreachMessage,
) -> Result<(), PipelineError> {
    let channel = message.channel;
    let sender = orch.collaborators.sender(channel);
    let outgoing = message.clone();

    let result = orch
        .executors
        .for_channel(channel)
        .run_for(record, || {
            let sender = sender.clone();
            let outgoing = outgoing.clone();
            async move { sender.send(&outgoing).await }
        })
        .await;

    match result {
        Ok(delivery_id) => {
            message.mark_sent(delivery_id);
            orch.repo.save_message(&message).await?;
            state::apply(record, Stage::Outreached)?;
            orch.repo.save(record).await?;
            info!(
                candidate_id = %record.id,
                %channel,
                priority = record.priority,
                "Outreach sent"
            );
            Ok(())
        }
        Err(e) if e.is_deferral() => Err(e),
        Err(e) => {
            message.status = MessageStatus::Failed;
            orch.repo.save_message(&message).await?;
            Err(e)
        }
    }
}
