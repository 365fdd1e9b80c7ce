//! Evaluation: deterministic scoring of a candidate against a project request.
//!
//! Default: `WeightedSkillScorer` (weighted skill overlap plus an experience signal).
//! The orchestrator holds an `Arc<dyn Scorer>`; any implementation must be a pure function
//! of its inputs so retries and replays reproduce identical scores.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::models::{CandidateRecord, ProjectRequest};

/// Scores are reported on a 0–100 scale, rounded to two decimals.
pub const SCORE_SCALE: f64 = 100.0;

/// Contribution of a signal whose inputs are missing.
pub const NEUTRAL_SIGNAL: f64 = 0.5;

// ────────────────────────────────────────────────────────────────────────────
// Output data model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScore {
    /// Final score, 0–100.
    pub value: f64,
    /// Weighted share of required skills the candidate has, 0–1.
    pub skill_overlap: f64,
    /// Experience signal, 0–1 (`NEUTRAL_SIGNAL` when unknown).
    pub experience_fit: f64,
    /// Sorted.
    pub matched_skills: Vec<String>,
    /// Sorted.
    pub missing_skills: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub skills: f64,
    pub experience: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            skills: 0.8,
            experience: 0.2,
        }
    }
}

impl ScoringWeights {
    /// Weights rescaled to sum to one. Unusable weights fall back to skills only.
    fn normalized(self) -> (f64, f64) {
        let skills = if self.skills.is_finite() { self.skills.max(0.0) } else { 0.0 };
        let experience = if self.experience.is_finite() {
            self.experience.max(0.0)
        } else {
            0.0
        };
        let total = skills + experience;
        if total <= 0.0 {
            (1.0, 0.0)
        } else {
            (skills / total, experience / total)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trait
// ────────────────────────────────────────────────────────────────────────────

pub trait Scorer: Send + Sync {
    fn evaluate(
        &self,
        record: &CandidateRecord,
        project: &ProjectRequest,
    ) -> Result<EvaluationScore, PipelineError>;
}

// ────────────────────────────────────────────────────────────────────────────
// WeightedSkillScorer
// ────────────────────────────────────────────────────────────────────────────

/// Algorithm:
/// 1. skill_overlap = Σ weight(matched skills) / Σ weight(required skills)
/// 2. experience_fit = min(1, years / min_years); neutral when either side is unknown,
///    1.0 when the project asks for zero years
/// 3. value = (w_skills × skill_overlap + w_experience × experience_fit) × 100
///
/// Skills are iterated in sorted order so floating-point summation is reproducible.
#[derive(Debug, Clone, Default)]
pub struct WeightedSkillScorer {
    weights: ScoringWeights,
}

impl WeightedSkillScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }
}

impl Scorer for WeightedSkillScorer {
    fn evaluate(
        &self,
        record: &CandidateRecord,
        project: &ProjectRequest,
    ) -> Result<EvaluationScore, PipelineError> {
        if project.required_skills.is_empty() {
            return Err(PipelineError::Validation(format!(
                "project {} has an empty requirement set",
                project.id
            )));
        }

        let mut matched_skills = Vec::new();
        let mut missing_skills = Vec::new();
        let mut matched_weight = 0.0_f64;
        let mut total_weight = 0.0_f64;

        // BTreeMap iteration: sorted, deterministic.
        for (skill, weight) in &project.required_skills {
            total_weight += weight;
            if record.skills.contains(skill) {
                matched_weight += weight;
                matched_skills.push(skill.clone());
            } else {
                missing_skills.push(skill.clone());
            }
        }

        let skill_overlap = if total_weight > 0.0 {
            (matched_weight / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let experience_fit = match (record.experience_years, project.min_experience_years) {
            (_, Some(0)) => 1.0,
            (Some(years), Some(min)) => (years as f64 / min as f64).min(1.0),
            _ => NEUTRAL_SIGNAL,
        };

        let (w_skills, w_experience) = self.weights.normalized();
        let raw = (w_skills * skill_overlap + w_experience * experience_fit) * SCORE_SCALE;

        Ok(EvaluationScore {
            value: round2(raw.clamp(0.0, SCORE_SCALE)),
            skill_overlap,
            experience_fit,
            matched_skills,
            missing_skills,
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ────────────────────────────────────────────────────────────────────────────
// Ranking
// ────────────────────────────────────────────────────────────────────────────

/// Total order for outreach: higher score first, then more recently updated profile,
/// then dedup key ascending. Unscored candidates sort last.
pub fn rank_order(a: &CandidateRecord, b: &CandidateRecord) -> Ordering {
    let score_a = a.score.as_ref().map(|s| s.value);
    let score_b = b.score.as_ref().map(|s| s.value);

    let by_score = match (score_a, score_b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_score
        .then_with(|| b.profile_updated_at.cmp(&a.profile_updated_at))
        .then_with(|| a.dedup_key.cmp(&b.dedup_key))
}

/// Sorts candidates into outreach order.
pub fn rank(records: &mut [CandidateRecord]) {
    records.sort_by(rank_order);
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{project, scored_record, skilled_record};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_partial_skill_match_scores_lower() {
        let scorer = WeightedSkillScorer::default();
        let project = project(&[("go", 3.0), ("rust", 2.0)]);

        let go_only = skilled_record(&["go"]);
        let both = skilled_record(&["go", "rust"]);

        let low = scorer.evaluate(&go_only, &project).unwrap();
        let high = scorer.evaluate(&both, &project).unwrap();

        assert!(low.value < high.value, "{} vs {}", low.value, high.value);
        assert!((low.skill_overlap - 0.6).abs() < 1e-9);
        assert_eq!(low.missing_skills, vec!["rust".to_string()]);
        assert_eq!(high.matched_skills, vec!["go".to_string(), "rust".to_string()]);
        // 0.8 * 0.6 + 0.2 * 0.5 = 0.58; 0.8 * 1.0 + 0.2 * 0.5 = 0.9
        assert_eq!(low.value, 58.0);
        assert_eq!(high.value, 90.0);
    }

    #[test]
    fn test_scoring_is_reproducible() {
        let scorer = WeightedSkillScorer::default();
        let project = project(&[("go", 3.0), ("rust", 2.0), ("kafka", 0.7)]);
        let record = skilled_record(&["rust", "kafka"]);

        let first = scorer.evaluate(&record, &project).unwrap();
        let replayed = WeightedSkillScorer::default()
            .evaluate(&record.clone(), &project.clone())
            .unwrap();
        assert_eq!(first, replayed);

        // And after a trip through persistence.
        let json = serde_json::to_string(&first).unwrap();
        let restored: EvaluationScore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, first);
    }

    #[test]
    fn test_missing_experience_is_neutral() {
        let scorer = WeightedSkillScorer::default();
        let mut project = project(&[("go", 1.0)]);
        project.min_experience_years = Some(4);

        let mut record = skilled_record(&["go"]);
        let unknown = scorer.evaluate(&record, &project).unwrap();
        assert_eq!(unknown.experience_fit, NEUTRAL_SIGNAL);

        record.experience_years = Some(2);
        let junior = scorer.evaluate(&record, &project).unwrap();
        assert_eq!(junior.experience_fit, 0.5);

        record.experience_years = Some(10);
        let senior = scorer.evaluate(&record, &project).unwrap();
        assert_eq!(senior.experience_fit, 1.0);
        assert_eq!(senior.value, 100.0);
    }

    #[test]
    fn test_empty_requirements_is_validation_error() {
        let scorer = WeightedSkillScorer::default();
        let mut project = project(&[("go", 1.0)]);
        project.required_skills.clear();
        assert!(matches!(
            scorer.evaluate(&skilled_record(&["go"]), &project),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_degenerate_weights_fall_back_to_skills() {
        let scorer = WeightedSkillScorer::new(ScoringWeights {
            skills: 0.0,
            experience: -1.0,
        });
        let project = project(&[("go", 1.0)]);
        let score = scorer.evaluate(&skilled_record(&["go"]), &project).unwrap();
        assert_eq!(score.value, 100.0);
    }

    #[test]
    fn test_rank_breaks_ties_by_recency_then_key() {
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let top = scored_record("url:z", 80.0, None);
        let tie_recent = scored_record("url:y", 50.0, Some(newer));
        let tie_old_b = scored_record("url:b", 50.0, Some(older));
        let tie_old_a = scored_record("url:a", 50.0, Some(older));
        let mut unscored = scored_record("url:0", 0.0, None);
        unscored.score = None;

        let mut records = vec![
            unscored.clone(),
            tie_old_b.clone(),
            top.clone(),
            tie_old_a.clone(),
            tie_recent.clone(),
        ];
        rank(&mut records);

        let keys: Vec<_> = records.iter().map(|r| r.dedup_key.as_str()).collect();
        assert_eq!(keys, vec!["url:z", "url:y", "url:a", "url:b", "url:0"]);
    }
}
