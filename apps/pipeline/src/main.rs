mod clients;
mod config;
mod db;
mod dedup;
mod errors;
mod evaluation;
mod executor;
mod models;
mod outreach;
mod pipeline;
mod routes;
mod state;
mod store;

#[cfg(test)]
mod testing;

use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::clients::http::{HttpScraper, HttpSearch, HttpSender};
use crate::clients::llm::{self, LlmClient};
use crate::clients::Collaborators;
use crate::config::Config;
use crate::db::create_pool;
use crate::evaluation::WeightedSkillScorer;
use crate::models::Channel;
use crate::outreach::{ChannelQuota, RedisQuota, SlidingWindowQuota};
use crate::pipeline::Orchestrator;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{MemoryRepository, PgRepository, Repository};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting talent pipeline v{}", env!("CARGO_PKG_VERSION"));

    // Initialize storage: PostgreSQL when configured, otherwise process memory
    let repo: Arc<dyn Repository> = match &config.database_url {
        Some(url) => {
            let db = create_pool(url, config.pipeline.db_max_connections).await?;
            Arc::new(PgRepository::new(db))
        }
        None => {
            warn!("DATABASE_URL not set; pipeline state will not survive a restart");
            Arc::new(MemoryRepository::new())
        }
    };

    // Channel quotas: shared across processes through Redis when configured
    let quotas = config.pipeline.quotas.clone();
    let quota: Arc<dyn ChannelQuota> = match &config.redis_url {
        Some(url) => {
            let redis = redis::Client::open(url.as_str())?;
            let quota = RedisQuota::connect(&redis, quotas).await?;
            info!("Redis channel quotas initialized");
            Arc::new(quota)
        }
        None => {
            warn!("REDIS_URL not set; channel quotas are counted in this process only");
            Arc::new(SlidingWindowQuota::new(quotas))
        }
    };

    // External collaborators
    let executors = &config.pipeline.executors;
    let llm = LlmClient::new(config.anthropic_api_key.clone(), executors.generation.timeout)?;
    info!("LLM client initialized (model: {})", llm::MODEL);

    let collaborators = Collaborators {
        search: Arc::new(HttpSearch::new(
            config.search_api_url.clone(),
            executors.search.timeout,
        )?),
        generator: Arc::new(llm),
        scraper: Arc::new(HttpScraper::new(
            config.scraper_api_url.clone(),
            executors.scraping.timeout,
        )?),
        email: Arc::new(HttpSender::new(
            Channel::Email,
            config.email_api_url.clone(),
            executors.email.timeout,
            executors.email.concurrency,
        )?),
        linkedin: Arc::new(HttpSender::new(
            Channel::LinkedIn,
            config.linkedin_api_url.clone(),
            executors.linkedin.timeout,
            executors.linkedin.concurrency,
        )?),
    };
    collaborators.check_senders()?;

    let scorer = Arc::new(WeightedSkillScorer::new(config.pipeline.weights));
    let orchestrator = Orchestrator::new(
        config.pipeline.clone(),
        repo.clone(),
        scorer,
        collaborators,
        quota,
    );

    // Resume interrupted campaigns and close out unanswered outreach
    let sweeper = orchestrator.clone();
    let sweep_interval = config.pipeline.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweeper.sweep(Utc::now()).await {
                Ok(0) => {}
                Ok(started) => info!(started, "Sweep resumed campaigns"),
                Err(e) => error!("Sweep failed: {e}"),
            }
        }
    });

    // Build app state
    let state = AppState { orchestrator, repo };

    // Build router
    // TODO: restrict origins once the dashboard has a fixed host
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
