use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::evaluation::ScoringWeights;
use crate::executor::{CircuitBreakerConfig, ExecutorConfig, ExecutorSettings, RetryPolicy};
use crate::models::Channel;
use crate::outreach::QuotaLimit;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Without it, pipeline state lives in process memory and is lost on exit.
    pub database_url: Option<String>,
    /// Without it, channel quotas are counted per process.
    pub redis_url: Option<String>,
    pub anthropic_api_key: String,
    pub search_api_url: String,
    pub scraper_api_url: String,
    pub email_api_url: String,
    pub linkedin_api_url: String,
    pub port: u16,
    pub rust_log: String,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            redis_url: optional_env("REDIS_URL"),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            search_api_url: require_env("SEARCH_API_URL")?,
            scraper_api_url: require_env("SCRAPER_API_URL")?,
            email_api_url: require_env("EMAIL_API_URL")?,
            linkedin_api_url: require_env("LINKEDIN_API_URL")?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

/// Pipeline tunables. None of these has a single right value; every one can be overridden
/// from the environment.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Candidates scoring below this (0–100) are Rejected after evaluation.
    pub score_floor: f64,
    /// Candidate tasks in flight per campaign run.
    pub worker_concurrency: usize,
    /// Outreached candidates with no response after this long are closed out.
    pub response_timeout: Duration,
    /// When false, a failed enrichment is skipped and the candidate moves on.
    pub enrichment_required: bool,
    pub executors: ExecutorSettings,
    pub quotas: HashMap<Channel, QuotaLimit>,
    pub weights: ScoringWeights,
    /// Period of the background resume/expiry sweep.
    pub sweep_interval: Duration,
    /// Connections in the PostgreSQL pool.
    pub db_max_connections: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            score_floor: 40.0,
            worker_concurrency: 16,
            response_timeout: Duration::from_secs(168 * 3600),
            enrichment_required: false,
            executors: ExecutorSettings::default(),
            quotas: HashMap::from([
                (
                    Channel::Email,
                    QuotaLimit {
                        max_sends: 100,
                        window: Duration::from_secs(3600),
                    },
                ),
                (
                    Channel::LinkedIn,
                    QuotaLimit {
                        max_sends: 20,
                        window: Duration::from_secs(86_400),
                    },
                ),
            ]),
            weights: ScoringWeights::default(),
            sweep_interval: Duration::from_secs(60),
            db_max_connections: 10,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = PipelineConfig::default();
        let initial_backoff = Duration::from_millis(env_or("RETRY_INITIAL_BACKOFF_MS", 500)?);
        let max_backoff = Duration::from_millis(env_or("RETRY_MAX_BACKOFF_MS", 30_000)?);

        let executor =
            |prefix: &str, concurrency: usize, timeout_secs: u64| -> Result<ExecutorConfig> {
                Ok(ExecutorConfig {
                    concurrency: env_or(&format!("{prefix}_CONCURRENCY"), concurrency)?,
                    timeout: Duration::from_secs(env_or(
                        &format!("{prefix}_TIMEOUT_SECS"),
                        timeout_secs,
                    )?),
                    retry: RetryPolicy {
                        max_attempts: env_or(&format!("{prefix}_MAX_ATTEMPTS"), 3)?,
                        initial_backoff,
                        max_backoff,
                        ..RetryPolicy::default()
                    },
                    breaker: CircuitBreakerConfig {
                        failure_threshold: env_or(&format!("{prefix}_BREAKER_THRESHOLD"), 5)?,
                        cooldown: Duration::from_secs(env_or(
                            &format!("{prefix}_BREAKER_COOLDOWN_SECS"),
                            30,
                        )?),
                    },
                })
            };

        let quota = |prefix: &str, max_sends: u32, window_secs: u64| -> Result<QuotaLimit> {
            Ok(QuotaLimit {
                max_sends: env_or(&format!("{prefix}_QUOTA"), max_sends)?,
                window: Duration::from_secs(env_or(
                    &format!("{prefix}_QUOTA_WINDOW_SECS"),
                    window_secs,
                )?),
            })
        };

        Ok(PipelineConfig {
            score_floor: env_or("SCORE_FLOOR", defaults.score_floor)?,
            worker_concurrency: env_or("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            response_timeout: Duration::from_secs(
                env_or::<u64>("RESPONSE_TIMEOUT_HOURS", 168)? * 3600,
            ),
            enrichment_required: env_or("ENRICHMENT_REQUIRED", defaults.enrichment_required)?,
            executors: ExecutorSettings {
                search: executor("SEARCH", 4, 30)?,
                generation: executor("GENERATION", 8, 60)?,
                scraping: executor("SCRAPING", 8, 20)?,
                email: executor("EMAIL", 4, 15)?,
                linkedin: executor("LINKEDIN", 2, 15)?,
            },
            quotas: HashMap::from([
                (Channel::Email, quota("EMAIL", 100, 3600)?),
                (Channel::LinkedIn, quota("LINKEDIN", 20, 86_400)?),
            ]),
            weights: ScoringWeights {
                skills: env_or("SCORE_WEIGHT_SKILLS", defaults.weights.skills)?,
                experience: env_or("SCORE_WEIGHT_EXPERIENCE", defaults.weights.experience)?,
            },
            sweep_interval: Duration::from_secs(env_or("SWEEP_INTERVAL_SECS", 60)?),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Unset and blank values both read as absent.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses `key` when set, otherwise returns `default`.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let config = PipelineConfig::default();
        assert!(config.score_floor > 0.0 && config.score_floor < 100.0);
        assert!(config.worker_concurrency > 0);
        assert_eq!(config.quotas.len(), 2);
        assert!(!config.enrichment_required);
    }

    #[test]
    fn test_env_or_parses_and_falls_back() {
        std::env::set_var("TALENT_PIPELINE_TEST_FLOOR", " 55.5 ");
        assert_eq!(env_or("TALENT_PIPELINE_TEST_FLOOR", 40.0).unwrap(), 55.5);
        assert_eq!(env_or("TALENT_PIPELINE_TEST_UNSET", 7_u32).unwrap(), 7);

        std::env::set_var("TALENT_PIPELINE_TEST_BAD", "lots");
        let err = env_or("TALENT_PIPELINE_TEST_BAD", 1_u32).unwrap_err();
        assert!(err.to_string().contains("TALENT_PIPELINE_TEST_BAD"));
    }

    #[test]
    fn test_blank_optional_env_is_absent() {
        assert_eq!(optional_env("TALENT_PIPELINE_TEST_NO_DB"), None);

        std::env::set_var("TALENT_PIPELINE_TEST_BLANK_DB", "   ");
        assert_eq!(optional_env("TALENT_PIPELINE_TEST_BLANK_DB"), None);

        std::env::set_var("TALENT_PIPELINE_TEST_DB", " postgres://localhost/pipeline ");
        assert_eq!(
            optional_env("TALENT_PIPELINE_TEST_DB").as_deref(),
            Some("postgres://localhost/pipeline")
        );
    }
}
