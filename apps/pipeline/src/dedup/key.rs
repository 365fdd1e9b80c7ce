use crate::errors::PipelineError;
use crate::models::{CandidateLead, DedupKey};

/// Canonical form of a profile URL: scheme, `www.`, query, fragment, trailing slashes and
/// all whitespace removed, lowercased. Returns `None` for blank input.
pub fn canonical_profile_url(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let lowered = compact.to_lowercase();

    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    let path = without_www
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');

    (!path.is_empty()).then(|| path.to_string())
}

fn canonical_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    (email.contains('@') && !email.starts_with('@') && !email.ends_with('@')).then_some(email)
}

fn canonical_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Computes the identity key for a lead.
///
/// A profile URL wins when present; otherwise the key is an email + name fingerprint.
/// Both forms are stable under case and whitespace variation.
pub fn dedup_key_for(lead: &CandidateLead) -> Result<DedupKey, PipelineError> {
    if let Some(url) = lead.profile_url.as_deref().and_then(canonical_profile_url) {
        return Ok(DedupKey::from_canonical(format!("url:{url}")));
    }
    if let Some(email) = lead.email.as_deref().and_then(canonical_email) {
        let name = canonical_name(&lead.name);
        return Ok(DedupKey::from_canonical(format!("email:{email}|name:{name}")));
    }
    Err(PipelineError::Validation(format!(
        "lead '{}' has neither a usable email nor a profile URL",
        lead.name.trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::lead;

    #[test]
    fn test_profile_url_case_and_scheme_insensitive() {
        let variants = [
            "linkedin.com/in/a",
            "LinkedIn.com/in/A",
            "https://www.linkedin.com/in/a/",
            "  http://LINKEDIN.com/in/a?trk=public#about ",
        ];
        let keys: Vec<_> = variants
            .iter()
            .map(|u| canonical_profile_url(u).unwrap())
            .collect();
        assert!(keys.iter().all(|k| k == "linkedin.com/in/a"), "{keys:?}");
    }

    #[test]
    fn test_blank_url_is_none() {
        assert_eq!(canonical_profile_url("   "), None);
        assert_eq!(canonical_profile_url("https://"), None);
    }

    #[test]
    fn test_url_key_preferred_over_email() {
        let mut l = lead("Ada", Some("ada@example.com"), Some("linkedin.com/in/ada"));
        let key = dedup_key_for(&l).unwrap();
        assert_eq!(key.as_str(), "url:linkedin.com/in/ada");

        l.profile_url = None;
        let key = dedup_key_for(&l).unwrap();
        assert_eq!(key.as_str(), "email:ada@example.com|name:ada");
    }

    #[test]
    fn test_email_fingerprint_stable_under_whitespace_and_case() {
        let a = lead("Ada  Lovelace", Some(" ADA@example.com "), None);
        let b = lead(" ada lovelace", Some("ada@Example.com"), None);
        assert_eq!(dedup_key_for(&a).unwrap(), dedup_key_for(&b).unwrap());
    }

    #[test]
    fn test_missing_contact_is_validation_error() {
        let l = lead("Nobody", None, Some("  "));
        assert!(matches!(
            dedup_key_for(&l),
            Err(PipelineError::Validation(_))
        ));
        let l = lead("Nobody", Some("not-an-email"), None);
        assert!(dedup_key_for(&l).is_err());
    }
}
