// Prompt constants for outreach drafting.

use crate::models::{CandidateRecord, Channel, ProjectRequest};

/// Standing instructions for every outreach draft.
pub const OUTREACH_SYSTEM: &str = "You are a technical recruiter writing a first-contact \
    message to a software engineer. \
    Write in plain text with no markdown, no subject line and no placeholders. \
    Mention only facts present in the candidate profile. \
    Do NOT invent compensation, company names or personal details. \
    Keep the tone direct and respectful.";

/// Replace `{title}`, `{location}`, `{channel_rules}`, `{name}`, `{headline}`,
/// `{matched_skills}` and `{missing_skills}` before sending.
pub const OUTREACH_PROMPT_TEMPLATE: &str = r#"Draft an outreach message for the role below.

ROLE: {title}
LOCATION: {location}

CANDIDATE:
- Name: {name}
- Headline: {headline}
- Skills matching the role: {matched_skills}
- Role skills not on their profile: {missing_skills}

{channel_rules}

Return only the message body."#;

const EMAIL_RULES: &str = "FORMAT: email body, at most 150 words, end with a one-line call to action.";

const LINKEDIN_RULES: &str =
    "FORMAT: LinkedIn connection note, at most 300 characters, no greeting line.";

pub fn build_outreach_prompt(
    record: &CandidateRecord,
    project: &ProjectRequest,
    channel: Channel,
) -> String {
    let (matched, missing) = record
        .score
        .as_ref()
        .map(|s| (s.matched_skills.join(", "), s.missing_skills.join(", ")))
        .unwrap_or_default();

    OUTREACH_PROMPT_TEMPLATE
        .replace("{title}", &project.title)
        .replace("{location}", project.location.as_deref().unwrap_or("unspecified"))
        .replace("{name}", &record.name)
        .replace("{headline}", record.headline.as_deref().unwrap_or("unknown"))
        .replace("{matched_skills}", or_none(&matched))
        .replace("{missing_skills}", or_none(&missing))
        .replace(
            "{channel_rules}",
            match channel {
                Channel::Email => EMAIL_RULES,
                Channel::LinkedIn => LINKEDIN_RULES,
            },
        )
}

fn or_none(list: &str) -> &str {
    if list.is_empty() {
        "none"
    } else {
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{Scorer, WeightedSkillScorer};
    use crate::testing::{project, skilled_record};

    #[test]
    fn test_prompt_fills_every_placeholder() {
        let project = project(&[("rust", 2.0), ("kafka", 1.0)]);
        let mut record = skilled_record(&["rust"]);
        record.score = Some(WeightedSkillScorer::default().evaluate(&record, &project).unwrap());

        let prompt = build_outreach_prompt(&record, &project, Channel::LinkedIn);
        assert!(!prompt.contains('{'), "{prompt}");
        assert!(prompt.contains("Skills matching the role: rust"));
        assert!(prompt.contains("not on their profile: kafka"));
        assert!(prompt.contains("300 characters"));
    }
}
