//! Bell Monitor
//!
//! This crate measures how far the newest finalized tipset in the bell
//! `MongoDB` store lags behind the wall clock and pushes that delay to a
//! Prometheus Pushgateway as the `filscan_bell_finalheight_delay` gauge.
//!
//! # Architecture
//!
//! - [`config`] - Flags and environment, read once at startup
//! - [`retry`] - Bounded retry with a fixed backoff for the initial connection
//! - [`publisher`] - Pushgateway client and the [`publisher::MetricSink`] seam
//! - [`lag_monitor`] - The fetch, compute and publish loop
//! - [`service`] - Lifecycle from connecting to releasing the store
//!
//! # Example
//!
//! ```no_run
//! use bell_monitor::{run_with_config, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_with_config(Config::default()).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod lag_monitor;
pub mod publisher;
pub mod retry;
pub mod service;

pub use config::{Config, LogFormat};
pub use lag_monitor::{LagMonitor, TickOutcome};
pub use service::{MonitorState, Supervisor};

use anyhow::{Context, Result};
use publisher::{DisabledSink, MetricSink, PushGateway};
use shared::storage::MongoConnector;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs the monitor with configuration from flags and environment.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the store cannot be
/// reached at startup.
pub async fn run() -> Result<()> {
    let config = Config::load()?;
    run_with_config(config).await
}

/// Runs the monitor with the provided configuration.
///
/// Stops gracefully on SIGINT or SIGTERM.
///
/// # Errors
///
/// Returns an error if:
/// - The push address cannot be used
/// - The store cannot be reached within the configured attempts
pub async fn run_with_config(config: Config) -> Result<()> {
    tracing::info!(
        interval = ?config.interval,
        push_address = config.push_address.as_deref().unwrap_or(""),
        connect_retries = config.connect_retries,
        network = config.labels.get("net").unwrap_or(""),
        "Bell monitor starting"
    );

    let sink = build_sink(&config)?;
    let connector = MongoConnector::new(
        config.mongo_dsn.clone(),
        config.connect_timeout,
        config.fetch_timeout,
    );

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(shutdown.clone()));

    let supervisor = Supervisor::new(config, shutdown);
    let result = supervisor.run(&connector, sink).await;
    signals.abort();

    if result.is_ok() {
        tracing::info!("Bell monitor exited gracefully");
    }
    result
}

/// Builds the metric sink for `config`.
///
/// Without a push address, publishing is disabled.
///
/// # Errors
///
/// Returns an error if the push address cannot be parsed.
pub fn build_sink(config: &Config) -> Result<Arc<dyn MetricSink>> {
    match config.push_address.as_deref() {
        Some(address) => {
            let gateway = PushGateway::new(address, config.publish_timeout)
                .context("Invalid Pushgateway configuration")?;
            Ok(Arc::new(gateway))
        }
        None => {
            tracing::warn!("No push address configured, delay will only be logged");
            Ok(Arc::new(DisabledSink))
        }
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    shutdown_signal().await;
    shutdown.cancel();
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
