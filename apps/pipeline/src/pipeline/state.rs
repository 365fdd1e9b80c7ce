//! Candidate stage machine.
//!
//! Forward edges only. Every non-terminal stage may also fall into `Failed`, and a stage may
//! loop back onto itself through an explicit Retry entry in the history.

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::PipelineError;
use crate::models::{AttemptError, CandidateRecord, Stage, StageTransition};

/// Allowed forward edges, excluding the universal `* -> Failed`.
const TRANSITIONS: &[(Stage, Stage)] = &[
    (Stage::Discovered, Stage::Deduplicated),
    (Stage::Discovered, Stage::Rejected),
    (Stage::Deduplicated, Stage::Evaluated),
    (Stage::Deduplicated, Stage::Rejected),
    (Stage::Evaluated, Stage::Enriched),
    (Stage::Evaluated, Stage::Rejected),
    (Stage::Enriched, Stage::Prioritized),
    (Stage::Prioritized, Stage::MessageDrafted),
    (Stage::MessageDrafted, Stage::Outreached),
    (Stage::Outreached, Stage::ResponseTracked),
];

pub fn can_transition(from: Stage, to: Stage) -> bool {
    if from.is_terminal() {
        return false;
    }
    to == Stage::Failed || TRANSITIONS.contains(&(from, to))
}

/// Moves `record` to `to`, appending history and stamping the entry time.
pub fn apply(record: &mut CandidateRecord, to: Stage) -> Result<(), PipelineError> {
    let from = record.stage;
    if !can_transition(from, to) {
        return Err(PipelineError::Validation(format!(
            "illegal stage transition {from} -> {to} for candidate {}",
            record.id
        )));
    }

    let now = Utc::now();
    record.history.push(StageTransition {
        from,
        to,
        retry: false,
        at: now,
    });
    record.entered_at.insert(to, now);
    record.stage = to;
    record.retrying = false;
    record.updated_at = now;

    debug!(candidate_id = %record.id, %from, %to, "Stage transition");
    Ok(())
}

/// Enters the Retrying sub-state of the current stage. Idempotent while already retrying.
pub fn mark_retrying(record: &mut CandidateRecord) {
    if record.retrying || record.is_terminal() {
        return;
    }
    let now = Utc::now();
    record.history.push(StageTransition {
        from: record.stage,
        to: record.stage,
        retry: true,
        at: now,
    });
    record.retrying = true;
    record.updated_at = now;
}

/// Absorbs the candidate into `Failed`, keeping the error as the outcome reason.
pub fn fail(record: &mut CandidateRecord, error: &PipelineError) -> Result<(), PipelineError> {
    let at = record.stage;
    apply(record, Stage::Failed)?;
    record.outcome_reason = Some(AttemptError::from_error(error));
    info!(candidate_id = %record.id, stage = %at, error = %error, "Candidate failed");
    Ok(())
}

pub fn reject(record: &mut CandidateRecord, reason: String) -> Result<(), PipelineError> {
    apply(record, Stage::Rejected)?;
    record.outcome_reason = Some(AttemptError::from_error(&PipelineError::Validation(
        reason,
    )));
    info!(candidate_id = %record.id, "Candidate rejected");
    Ok(())
}

/// True when the recorded stage sequence never moves backwards, treating Retry entries
/// as the only same-stage loops.
#[cfg(test)]
pub fn history_is_monotonic(record: &CandidateRecord) -> bool {
    record.history.iter().all(|t| {
        if t.retry {
            t.from == t.to
        } else {
            t.to.ordinal() > t.from.ordinal()
        }
    }) && record
        .history
        .windows(2)
        .all(|w| w[0].to == w[1].from)
}
