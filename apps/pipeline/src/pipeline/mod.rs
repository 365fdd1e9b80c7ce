//! Pipeline orchestration: the candidate stage machine and the campaign runs that drive it.
//!
//! ```text
//! Discovered -> Deduplicated -> Evaluated -> Enriched -> Prioritized
//!            -> MessageDrafted -> Outreached -> ResponseTracked
//! ```
//!
//! plus the absorbing `Rejected` and `Failed`. A run works in phases: discovery, then
//! concurrent evaluation/enrichment, ranking, concurrent drafting, and rank-ordered
//! outreach through the channel quotas. Every transition is persisted before the next
//! stage begins, so a run can stop anywhere and be resumed by running the campaign again.

mod orchestrator;
pub mod state;
mod steps;


pub use orchestrator::Orchestrator;
