//! expert-availability - Expert calendar availability sync engine
//!
//! This is the main entry point for the expert-availability application.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use expert_availability::cache::TtlCache;
use expert_availability::config::Config;
use expert_availability::database::SqliteDatabase;
use expert_availability::experts::ExpertManager;
use expert_availability::provider::{AvailabilityProvider, CronofyClient};
use expert_availability::search::{sink_from_config, SearchSink};
use expert_availability::server::{AppState, Server};
use expert_availability::sync::{
    planner_from_config, AvailabilitySync, HttpClientWithRateLimit, RefreshScheduler,
    SchedulerConfig, SyncSettings,
};
use expert_availability::telemetry::{init_tracing, mask_secret};

/// expert-availability - Expert calendar availability sync engine
#[derive(Parser, Debug)]
#[command(name = "expert-availability")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "EXPERT_AVAILABILITY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting expert-availability"
    );
    info!(
        cronofy_token = %mask_secret(config.provider.access_token.as_deref()),
        algolia_app_id = %config.search.app_id.as_deref().unwrap_or("[NOT SET]"),
        algolia_api_key = %mask_secret(config.search.api_key.as_deref()),
        "Loaded credentials"
    );

    // Initialize database
    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let cache = Arc::new(TtlCache::new(Duration::from_secs(config.cache.ttl_secs)));

    // Provider client and search sink share nothing but the runtime
    let http = HttpClientWithRateLimit::new(config.provider.rate_limit.clone())?;
    let provider: Arc<dyn AvailabilityProvider> =
        Arc::new(CronofyClient::new(http, config.provider.clone()));
    if !provider.is_configured() {
        warn!("CRONOFY_ACCESS_TOKEN not set; availability will be recorded as unknown");
    }

    let sink: Arc<dyn SearchSink> = Arc::from(sink_from_config(&config.search, reqwest::Client::new()));
    info!(
        enabled = sink.is_enabled(),
        index = %config.search.index_name,
        "Search sink initialized"
    );

    let planner = planner_from_config(&config.provider)?;
    let sync = AvailabilitySync::new(
        Arc::clone(&database),
        provider,
        Arc::clone(&sink),
        planner,
        SyncSettings::from_config(&config)?,
    )?
    .with_cache(Arc::clone(&cache));
    let sync = Arc::new(sync);

    let experts = Arc::new(ExpertManager::new(Arc::clone(&database), Arc::clone(&cache)));

    // Start the periodic trigger
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (scheduler_status, scheduler_handle) = if config.scheduler.enabled {
        let scheduler = RefreshScheduler::new(
            SchedulerConfig::from(&config.scheduler),
            sync.clone(),
            shutdown_tx.subscribe(),
        );
        let status = scheduler.status();
        let handle = tokio::spawn(scheduler.run());
        info!(
            interval_minutes = config.scheduler.interval_minutes,
            "Availability scheduler started"
        );
        (Some(status), Some(handle))
    } else {
        info!("Availability scheduler disabled");
        (None, None)
    };

    // Create application state
    let state = AppState {
        database,
        experts,
        sync,
        scheduler_status,
        cache,
        search_enabled: sink.is_enabled(),
    };

    // Create and start the HTTP server
    let server = Server::new(config.server.clone(), state);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;

    // Stop the scheduler and wait for any in-flight pass
    let _ = shutdown_tx.send(());
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task failed");
        }
    }

    info!("expert-availability shutdown complete");

    result.map_err(Into::into)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
