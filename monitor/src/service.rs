//! Monitor lifecycle.
//!
//! The [`Supervisor`] walks the monitor through
//! `Uninitialized → Connecting → Running → ShuttingDown → Terminated`,
//! owning the store connection from the first successful attempt until it
//! is released on the way out.

use anyhow::{Context, Result};
use shared::storage::StoreConnector;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::lag_monitor::{system_clock, Clock, LagMonitor, MonitorSettings};
use crate::publisher::MetricSink;
use crate::retry::retry;

/// Lifecycle state of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorState {
    /// Not started yet.
    Uninitialized,
    /// Establishing the store connection.
    Connecting,
    /// Ticking.
    Running,
    /// Shutdown requested; finishing the current tick and releasing the store.
    ShuttingDown,
    /// Stopped.
    Terminated,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Drives the monitor from startup to termination.
pub struct Supervisor {
    config: Config,
    shutdown: CancellationToken,
    state: watch::Sender<MonitorState>,
    clock: Clock,
}

impl Supervisor {
    /// Creates a supervisor.
    ///
    /// Cancelling `shutdown` stops the monitor: during connection it
    /// abandons further attempts, while running it stops scheduling ticks.
    #[must_use]
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let (state, _) = watch::channel(MonitorState::Uninitialized);
        Self {
            config,
            shutdown,
            state,
            clock: system_clock(),
        }
    }

    /// Replaces the wall clock handed to the lag monitor.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    fn transition(&self, next: MonitorState) {
        let previous = self.state.send_replace(next);
        tracing::info!(from = %previous, to = %next, "Monitor state changed");
    }

    /// Connects to the store, runs the lag monitor until shutdown and
    /// releases the store.
    ///
    /// The store is released even if the monitor loop panics.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The store cannot be reached within the configured number of
    ///   attempts. No tick runs in that case.
    /// - The monitor loop panicked
    pub async fn run(&self, connector: &dyn StoreConnector, sink: Arc<dyn MetricSink>) -> Result<()> {
        self.transition(MonitorState::Connecting);

        let policy = self.config.retry_policy();
        let connect = retry(policy, "connect to tipset store", |attempt| {
            tracing::debug!(attempt, "Connecting to tipset store");
            connector.connect()
        });

        let store = tokio::select! {
            result = connect => match result {
                Ok(store) => store,
                Err(e) => {
                    self.transition(MonitorState::Terminated);
                    return Err(e).context("Unable to establish tipset store connection");
                }
            },
            () = self.shutdown.cancelled() => {
                tracing::info!("Shutdown requested while connecting");
                self.transition(MonitorState::Terminated);
                return Ok(());
            }
        };

        self.transition(MonitorState::Running);

        let monitor = LagMonitor::new(
            Arc::clone(&store),
            sink,
            self.config.labels.clone(),
            MonitorSettings::from(&self.config),
        )
        .with_clock(Arc::clone(&self.clock));

        let mut ticking = tokio::spawn({
            let shutdown = self.shutdown.clone();
            async move { monitor.run(shutdown).await }
        });

        let stopped = tokio::select! {
            joined = &mut ticking => joined,
            () = self.shutdown.cancelled() => {
                self.transition(MonitorState::ShuttingDown);
                (&mut ticking).await
            }
        };

        // The loop may also end without a signal if it panicked
        if self.state() == MonitorState::Running {
            self.transition(MonitorState::ShuttingDown);
        }

        store.close().await;
        self.transition(MonitorState::Terminated);

        let ticks = stopped.context("Lag monitor loop aborted")?;
        tracing::info!(ticks, "Tipset store connection released");
        Ok(())
    }
}
