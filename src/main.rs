//! PADDOCK: horse-race betting assistant
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the race source, analyst and session store, restores saved
//! sessions and serves the HTTP API until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use paddock::config::{self, SourceKind};
use paddock::data::api::ApiSource;
use paddock::data::cache::CachedSource;
use paddock::data::fixture::FixtureSource;
use paddock::data::RaceDataSource;
use paddock::engine::Advisor;
use paddock::llm::gemini::GeminiClient;
use paddock::llm::heuristic::HeuristicAnalyst;
use paddock::llm::RaceAnalyst;
use paddock::server;
use paddock::storage::{self, PortfolioHistory};
use paddock::wizard::SessionStore;

const BANNER: &str = r#"
 ____   _    ____  ____   ___   ____ _  __
|  _ \ / \  |  _ \|  _ \ / _ \ / ___| |/ /
| |_) / _ \ | | | | | | | | | | |   | ' /
|  __/ ___ \| |_| | |_| | |_| | |___| . \
|_| /_/   \_\____/|____/ \___/ \____|_|\_\

  Horse-race betting assistant
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = config::AppConfig::path_from_env();
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        name = %cfg.assistant.name,
        config = %config_path,
        version = env!("CARGO_PKG_VERSION"),
        "PADDOCK starting up"
    );

    // -- Components ------------------------------------------------------

    let source = build_source(&cfg.data)?;
    let analyst = build_analyst(&cfg.llm)?;
    let strategy = cfg.strategy.build()?;

    let history = if cfg.storage.history_url.is_empty() {
        info!("Portfolio history disabled");
        None
    } else {
        match PortfolioHistory::open(&cfg.storage.history_url).await {
            Ok(h) => Some(Arc::new(h)),
            Err(e) => {
                warn!(error = %e, "Portfolio history unavailable, continuing without it");
                None
            }
        }
    };

    let store = Arc::new(SessionStore::new());
    let session_file = cfg.storage.session_file.as_str();
    match storage::load_sessions(Some(session_file)) {
        Ok(sessions) if !sessions.is_empty() => {
            let restored = store.restore(sessions).await;
            info!(restored, "Sessions restored");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Ignoring unreadable session snapshot"),
    }

    let advisor = Arc::new(
        Advisor::new(source, strategy, analyst, store.clone(), history)
            .with_analyst_timeout(cfg.llm.timeout())
            .with_top_options(cfg.llm.top_options)
            .with_default_risk_ratio(cfg.strategy.risk_ratio()?),
    );

    // -- Idle session sweeper --------------------------------------------

    let max_idle = chrono::Duration::minutes(cfg.assistant.session_idle_minutes);
    let sweep_every = Duration::from_secs(cfg.assistant.purge_interval_secs.max(1));
    let sweeper_store = store.clone();
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            sweeper_store.purge_idle(max_idle).await;
        }
    });

    // -- Serve -----------------------------------------------------------

    let addr = cfg.server.addr()?;
    info!(%addr, "Press Ctrl+C to stop.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received.");
    };
    server::serve(advisor, addr, shutdown).await?;
    sweeper.abort();

    // Save sessions for the next start
    let sessions = store.snapshot().await;
    storage::save_sessions(&sessions, Some(session_file))?;
    info!(sessions = sessions.len(), "PADDOCK shut down cleanly.");

    Ok(())
}

/// Race data source for the configured backend, behind the TTL cache.
fn build_source(cfg: &config::DataConfig) -> Result<Arc<dyn RaceDataSource>> {
    let source: Arc<dyn RaceDataSource> = match cfg.source {
        SourceKind::Api => {
            info!(base_url = %cfg.base_url, "Using race API");
            let api = ApiSource::new(&cfg.base_url, cfg.timeout_secs)?;
            Arc::new(CachedSource::new(api, cfg.cache_ttl()))
        }
        SourceKind::Fixture => {
            let fixture = FixtureSource::from_file(&cfg.fixture_path, cfg.synthesize_odds)
                .context("Failed to load race fixture")?;
            info!(path = %cfg.fixture_path, races = fixture.race_count(), "Using race fixture");
            Arc::new(CachedSource::new(fixture, cfg.cache_ttl()))
        }
    };
    Ok(source)
}

/// Gemini when a key is configured, the offline heuristic otherwise.
fn build_analyst(cfg: &config::LlmConfig) -> Result<Arc<dyn RaceAnalyst>> {
    let Some(api_key) = cfg.api_key() else {
        warn!(env = %cfg.api_key_env, "No LLM API key configured, using heuristic analyst");
        return Ok(Arc::new(HeuristicAnalyst::default()));
    };

    if cfg.provider != "gemini" {
        warn!(provider = %cfg.provider, "Unknown LLM provider, defaulting to Gemini");
    }
    let mut client = GeminiClient::new(api_key, Some(cfg.model.clone()), Some(cfg.max_output_tokens))?
        .with_temperature(cfg.temperature);
    if let Some(base_url) = &cfg.base_url {
        client = client.with_base_url(base_url.clone());
    }
    info!(model = %cfg.model, "Using Gemini analyst");
    Ok(Arc::new(client))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paddock=info"));

    let json_logging = std::env::var("PADDOCK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
