//! # lectern-daemon
//!
//! The Lectern source tooling daemon.
//!
//! This daemon is responsible for:
//! - Owning the sandbox runtimes, one worker pool per role (search,
//!   execution, debug)
//! - Loading source definitions into the catalog
//! - Running source tests through the rule pipeline
//! - Hosting debug sessions and single-rule evaluation
//! - Exposing all of it as a JSON-RPC API over TCP
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     lectern-daemon                        │
//! │                                                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐    │
//! │  │   Source     │  │    Rule      │  │    Debug     │    │
//! │  │   Catalog    │  │   Pipeline   │  │   Sessions   │    │
//! │  └──────────────┘  └──────┬───────┘  └──────┬───────┘    │
//! │                           ▼                 ▼            │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │       Sandbox runtimes (search / exec / debug)      │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                JSON-RPC API Server                  │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//!
//! The daemon reads configuration from `$XDG_CONFIG_HOME/lectern/config.toml`,
//! creating a commented default on first start.
//!
//! ## Running
//!
//! ```bash
//! # Start the daemon
//! cargo run --bin lectern-daemon
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin lectern-daemon
//! ```

use anyhow::{Context, Result};
use lectern_pipeline::{HttpFetcher, RulePipeline};
use lectern_runtime::RuntimeSet;
use lectern_source_core::{InMemoryCatalog, SourceCatalog};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lectern_daemon::api::{self, ApiImpl};
use lectern_daemon::config::Config;
use lectern_daemon::debug::SessionStore;

#[tokio::main]
async fn main() -> Result<()> {
    // The log level comes from the config, so load it before logging starts
    let loaded = Config::load_default();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting lectern-daemon v{}", env!("CARGO_PKG_VERSION"));
    match &loaded {
        Ok(_) => info!("Loaded configuration from default path"),
        Err(e) => warn!("Failed to load config, using defaults: {:#}", e),
    }

    let runtimes =
        RuntimeSet::new(config.runtime_set()).context("Failed to start sandbox runtimes")?;
    info!(
        search = runtimes.search.pool().worker_count(),
        execution = runtimes.execution.pool().worker_count(),
        debug = runtimes.debug.pool().worker_count(),
        "Sandbox runtimes started"
    );

    let catalog: Arc<dyn SourceCatalog> = Arc::new(load_catalog(&config));

    let fetcher = HttpFetcher::new(
        &config.pipeline.user_agent,
        Duration::from_millis(config.pipeline.fetch_timeout_ms),
    );
    let pipeline = RulePipeline::from_runtimes(&runtimes, Arc::new(fetcher))
        .with_timeouts(config.pipeline.timeouts.clone())
        .with_thresholds(config.policy);

    let sessions = Arc::new(SessionStore::new(
        Arc::clone(&runtimes.debug),
        Arc::clone(&catalog),
        config.policy,
        config.debug.log_capacity,
    ));
    let expiry = spawn_session_expiry(
        Arc::clone(&sessions),
        Duration::from_secs(config.debug.idle_expiry_secs),
    );

    let api = ApiImpl::new(sessions, Arc::new(pipeline), catalog);
    let (server_handle, addr) = api::start_server(&config.daemon.bind_address, api).await?;

    info!("Daemon startup complete");
    info!("Listening on: {}", addr);
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");

    server_handle.stop()?;
    expiry.abort();

    let cancelled = runtimes
        .shutdown(Duration::from_secs(config.daemon.shutdown_grace_secs))
        .await;
    if cancelled > 0 {
        warn!("Cancelled {} running execution(s)", cancelled);
    }

    info!("Daemon stopped");
    Ok(())
}

/// Load source definitions, falling back to an empty catalog.
fn load_catalog(config: &Config) -> InMemoryCatalog {
    let path = match config.sources_path() {
        Ok(path) => path,
        Err(e) => {
            warn!("Cannot determine sources path: {:#}", e);
            return InMemoryCatalog::new();
        }
    };
    if !Path::new(&path).exists() {
        info!("No source definitions at {}", path.display());
        return InMemoryCatalog::new();
    }
    match InMemoryCatalog::from_path(&path) {
        Ok(catalog) => {
            info!("Loaded {} source(s) from {}", catalog.len(), path.display());
            catalog
        }
        Err(e) => {
            warn!("Failed to load sources from {}: {}", path.display(), e);
            InMemoryCatalog::new()
        }
    }
}

/// Periodically drop idle debug sessions.
fn spawn_session_expiry(
    sessions: Arc<SessionStore>,
    idle: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval((idle / 4).max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            sessions.expire_idle(idle).await;
        }
    })
}
