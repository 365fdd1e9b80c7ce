// Core data model: candidates, projects, campaigns, outreach messages and the stage enum.
// Records are plain serde structs; the repository decides how they are laid out on disk.

pub mod campaign;
pub mod candidate;
pub mod outreach;
pub mod project;
pub mod stage;

pub use campaign::{Campaign, CampaignStatus};
pub use candidate::{
    normalize_skill, AttemptError, CandidateLead, CandidateRecord, DedupKey, LeadSource,
    ProfilePatch, StageTransition,
};
pub use outreach::{Channel, MessageStatus, OutreachMessage, ResponseSignal};
pub use project::{ProjectRequest, ProjectStatus};
pub use stage::Stage;
