use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::normalize_skill;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Open,
    Filled,
    Cancelled,
}

/// The hiring need a campaign sources against. Only `status` may change once a
/// campaign has started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRequest {
    pub id: Uuid,
    pub title: String,
    /// Normalized skill tag -> weight. Weights are positive.
    pub required_skills: BTreeMap<String, f64>,
    #[serde(default)]
    pub min_experience_years: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
    /// Upper bound on leads pulled from search, if any.
    #[serde(default)]
    pub max_leads: Option<u32>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

impl ProjectRequest {
    pub fn new(title: impl Into<String>, skills: &[(&str, f64)]) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            required_skills: skills
                .iter()
                .filter_map(|(s, w)| normalize_skill(s).map(|s| (s, *w)))
                .collect(),
            min_experience_years: None,
            location: None,
            max_leads: None,
            status: ProjectStatus::Open,
            created_at: Utc::now(),
        }
    }

    /// Re-normalizes skill keys (merging weights of tags that collapse together) and checks
    /// the requirement set is usable for scoring.
    pub fn normalized(mut self) -> Result<Self, PipelineError> {
        let mut skills = BTreeMap::new();
        for (skill, weight) in std::mem::take(&mut self.required_skills) {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(PipelineError::Validation(format!(
                    "skill '{skill}' has non-positive weight {weight}"
                )));
            }
            if let Some(key) = normalize_skill(&skill) {
                *skills.entry(key).or_insert(0.0) += weight;
            }
        }
        if skills.is_empty() {
            return Err(PipelineError::Validation(
                "project request has an empty requirement set".to_string(),
            ));
        }
        self.required_skills = skills;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_merges_case_variants() {
        let mut project = ProjectRequest::new("Backend", &[("Go", 3.0)]);
        project.required_skills.insert(" GO ".to_string(), 1.0);
        let project = project.normalized().unwrap();
        assert_eq!(project.required_skills.len(), 1);
        assert_eq!(project.required_skills["go"], 4.0);
    }

    #[test]
    fn test_empty_requirements_rejected() {
        let project = ProjectRequest::new("Nothing", &[]);
        assert!(matches!(
            project.normalized(),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_non_positive_weight_rejected() {
        let project = ProjectRequest::new("Backend", &[("rust", 0.0)]);
        assert!(project.normalized().is_err());
    }
}
