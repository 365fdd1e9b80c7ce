use std::fmt;

use serde::{Deserialize, Serialize};

/// Named steps of the per-candidate pipeline, in pipeline order.
///
/// `Rejected` and `Failed` are absorbing; `ResponseTracked` is the successful terminal stage.
/// Retrying is not a stage of its own: it is a flag on the record attached to whichever
/// non-terminal stage is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    Deduplicated,
    Evaluated,
    Enriched,
    Prioritized,
    MessageDrafted,
    Outreached,
    ResponseTracked,
    Rejected,
    Failed,
}

impl Stage {
    #[cfg(test)]
    pub const ALL: [Stage; 10] = [
        Stage::Discovered,
        Stage::Deduplicated,
        Stage::Evaluated,
        Stage::Enriched,
        Stage::Prioritized,
        Stage::MessageDrafted,
        Stage::Outreached,
        Stage::ResponseTracked,
        Stage::Rejected,
        Stage::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::ResponseTracked | Stage::Rejected | Stage::Failed
        )
    }

    /// Position used to check that a candidate's recorded stage sequence never decreases.
    /// Both absorbing states sort after every forward stage.
    #[cfg(test)]
    pub fn ordinal(self) -> u8 {
        match self {
            Stage::Discovered => 0,
            Stage::Deduplicated => 1,
            Stage::Evaluated => 2,
            Stage::Enriched => 3,
            Stage::Prioritized => 4,
            Stage::MessageDrafted => 5,
            Stage::Outreached => 6,
            Stage::ResponseTracked => 7,
            Stage::Rejected | Stage::Failed => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Discovered => "discovered",
            Stage::Deduplicated => "deduplicated",
            Stage::Evaluated => "evaluated",
            Stage::Enriched => "enriched",
            Stage::Prioritized => "prioritized",
            Stage::MessageDrafted => "message_drafted",
            Stage::Outreached => "outreached",
            Stage::ResponseTracked => "response_tracked",
            Stage::Rejected => "rejected",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_stages() {
        let terminal: Vec<_> = Stage::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![&Stage::ResponseTracked, &Stage::Rejected, &Stage::Failed]
        );
    }

    #[test]
    fn test_ordinals_follow_pipeline_order() {
        let forward = &Stage::ALL[..8];
        assert!(forward.windows(2).all(|w| w[0].ordinal() < w[1].ordinal()));
        assert_eq!(Stage::Rejected.ordinal(), Stage::Failed.ordinal());
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::MessageDrafted).unwrap();
        assert_eq!(json, "\"message_drafted\"");
        assert_eq!(Stage::MessageDrafted.as_str(), "message_drafted");
    }
}
