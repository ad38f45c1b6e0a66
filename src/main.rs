//! PROPLINE: sport-aware projection acquisition pipeline
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the backend collaborators into the orchestrator, runs the
//! default sport once, serves the dashboard and waits for Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use propline::config;
use propline::dashboard::{self, routes::DashboardState};
use propline::engine::{Orchestrator, RunOutcome, RunRequest};
use propline::services::client::BackendClient;
use propline::services::enrichment::HttpEnrichmentService;
use propline::services::games::HttpGamesProvider;
use propline::services::projections::HttpProjectionSource;
use propline::services::sports::HttpSportActivator;
use propline::services::Collaborators;

const BANNER: &str = r#"
 ____  ____   ___  ____  _     ___ _   _ _____
|  _ \|  _ \ / _ \|  _ \| |   |_ _| \ | | ____|
| |_) | |_) | | | | |_) | |    | ||  \| |  _|
|  __/|  _ <| |_| |  __/| |___ | || |\  | |___
|_|   |_| \_\\___/|_|   |_____|___|_| \_|_____|

  Projection acquisition pipeline
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        backend = %cfg.api.base_url,
        default_sport = %cfg.pipeline.default_sport,
        page_size = cfg.pipeline.page_size,
        offset_ceiling = cfg.pipeline.offset_ceiling,
        enrichment_cap = cfg.pipeline.enrichment_cap,
        filter_upcoming = cfg.pipeline.filter_upcoming,
        "PROPLINE starting up"
    );

    if cfg.api.api_key_env.is_some() && cfg.api.api_key().is_none() {
        warn!("Backend API key env var configured but not set; calling backend unauthenticated");
    }

    // -- Initialise components -------------------------------------------

    let backend = BackendClient::from_config(&cfg.api)?;
    let collaborators = Collaborators {
        activator: Arc::new(HttpSportActivator::new(backend.clone())),
        source: Arc::new(HttpProjectionSource::new(backend.clone())),
        enrichment: Arc::new(HttpEnrichmentService::new(backend.clone())),
        games: Arc::new(HttpGamesProvider::new(backend)),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        collaborators,
        cfg.pipeline.clone(),
        &cfg.breaker,
        cfg.api.call_timeout(),
    ));

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(Arc::clone(&orchestrator)));
        dashboard::spawn_dashboard(state, cfg.dashboard.port)?;
    }

    // -- Initial run -------------------------------------------------------

    let request = RunRequest::new(
        cfg.pipeline.default_sport(),
        cfg.pipeline.default_prop_type.clone(),
        cfg.pipeline.default_stat_filter(),
    );
    let initial = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(request).await })
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let interrupted = tokio::select! {
        joined = initial => {
            match joined {
                Ok(Some(outcome)) => log_outcome(&outcome),
                Ok(None) => info!("Initial run skipped; identical run already in flight"),
                Err(e) => error!(error = %e, "Initial run task panicked"),
            }
            false
        }
        _ = &mut shutdown => true,
    };

    if !interrupted && cfg.dashboard.enabled {
        info!(port = cfg.dashboard.port, "Serving dashboard. Press Ctrl+C to stop.");
        shutdown.await?;
        info!("Shutdown signal received.");
    } else if interrupted {
        info!("Shutdown signal received.");
    }

    info!("PROPLINE shut down cleanly.");
    Ok(())
}

/// Log a human-readable run summary.
fn log_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed {
            projections,
            enriched,
            attempts,
        } => info!(
            published = projections.len(),
            enriched,
            attempts,
            "Initial run complete"
        ),
        RunOutcome::Failed {
            error,
            attempts,
            projections,
        } => error!(
            error = %error,
            attempts,
            kept = projections.len(),
            "Initial run failed"
        ),
        RunOutcome::Superseded => info!("Initial run superseded by a newer request"),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("propline=info"));

    let json_logging = std::env::var("PROPLINE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
