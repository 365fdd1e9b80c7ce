//! Outreach: channel quotas, admission and message drafting prompts.

pub mod prompts;
pub mod quota;
pub mod scheduler;

pub use quota::{Admission, ChannelQuota, QuotaLimit, RedisQuota, SlidingWindowQuota};
pub use scheduler::OutreachScheduler;
