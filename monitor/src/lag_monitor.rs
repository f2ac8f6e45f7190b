//! Finalized-height lag monitoring.
//!
//! On every tick the monitor reads the newest tipset's timestamp, computes
//! how far it lags behind the wall clock and publishes the delay. Fetch and
//! publish are each bounded by their own timeout; ticks never overlap.

use chrono::{DateTime, Utc};
use shared::models::{DelaySample, LagSample, PublishLabels};
use shared::storage::{StoreError, TipsetStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::publisher::MetricSink;

/// Source of wall-clock time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Returns a clock reading [`Utc::now`].
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Errors returned by [`fetch_newest_timestamp`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The store answered with an error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The store did not answer in time.
    #[error("Fetch timed out after {0:?}")]
    TimedOut(Duration),
}

/// Reads the newest tipset's timestamp, bounded by `timeout`.
///
/// # Errors
///
/// Returns an error if the store fails, is empty, holds a malformed
/// timestamp, or does not answer within `timeout`.
pub async fn fetch_newest_timestamp(
    store: &dyn TipsetStore,
    timeout: Duration,
) -> Result<LagSample, FetchError> {
    match tokio::time::timeout(timeout, store.newest_sample()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(FetchError::TimedOut(timeout)),
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The delay was computed and handed to the sink within the publish timeout.
    Published(DelaySample),
    /// The fetch failed; nothing was published.
    FetchFailed(FetchError),
    /// The delay was computed but the sink did not return in time.
    PublishTimedOut(DelaySample),
}

impl TickOutcome {
    /// Returns the computed delay, if the fetch succeeded.
    #[must_use]
    pub fn delay(&self) -> Option<&DelaySample> {
        match self {
            Self::Published(delay) | Self::PublishTimedOut(delay) => Some(delay),
            Self::FetchFailed(_) => None,
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published(_) => write!(f, "published"),
            Self::FetchFailed(_) => write!(f, "fetch_failed"),
            Self::PublishTimedOut(_) => write!(f, "publish_timed_out"),
        }
    }
}

/// Timing of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Time between ticks.
    pub interval: Duration,
    /// Bound on each fetch.
    pub fetch_timeout: Duration,
    /// Bound on each publish.
    pub publish_timeout: Duration,
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.interval,
            fetch_timeout: config.fetch_timeout,
            publish_timeout: config.publish_timeout,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Periodic fetch, compute and publish loop.
pub struct LagMonitor {
    store: Arc<dyn TipsetStore>,
    sink: Arc<dyn MetricSink>,
    labels: PublishLabels,
    settings: MonitorSettings,
    clock: Clock,
}

impl LagMonitor {
    /// Creates a new lag monitor.
    ///
    /// # Arguments
    ///
    /// * `store` - Connected tipset store
    /// * `sink` - Destination for the computed delay
    /// * `labels` - Labels attached to every published delay
    /// * `settings` - Interval and timeouts
    #[must_use]
    pub fn new(
        store: Arc<dyn TipsetStore>,
        sink: Arc<dyn MetricSink>,
        labels: PublishLabels,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            store,
            sink,
            labels,
            settings,
            clock: system_clock(),
        }
    }

    /// Replaces the wall clock used for delay computation.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Runs one fetch, compute and publish cycle.
    ///
    /// Never fails: fetch errors skip the publish, publish errors are
    /// swallowed by the sink.
    pub async fn tick(&self) -> TickOutcome {
        let sample =
            match fetch_newest_timestamp(self.store.as_ref(), self.settings.fetch_timeout).await {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to fetch newest tipset timestamp");
                    return TickOutcome::FetchFailed(e);
                }
            };

        let delay = DelaySample::between(&sample, (self.clock)());

        if delay.is_clock_skewed() {
            tracing::warn!(
                delay_seconds = delay.seconds,
                min_timestamp = %delay.min_timestamp,
                "Newest tipset timestamp is ahead of the local clock"
            );
        }

        tracing::info!(
            delay_seconds = delay.seconds,
            min_timestamp = %delay.min_timestamp,
            "Finalized-height delay computed"
        );

        let publish = self.sink.publish(&delay, &self.labels);
        if tokio::time::timeout(self.settings.publish_timeout, publish)
            .await
            .is_err()
        {
            tracing::warn!(
                timeout = ?self.settings.publish_timeout,
                "Publishing delay timed out"
            );
            return TickOutcome::PublishTimedOut(delay);
        }

        TickOutcome::Published(delay)
    }

    /// Starts the monitoring loop.
    ///
    /// The first tick fires one interval after the call. A tick that
    /// outlasts the interval delays the next one instead of overlapping it.
    ///
    /// # Cancellation
    ///
    /// Returns once `shutdown` is cancelled. A tick already in progress runs
    /// to completion first; no tick starts after cancellation is observed.
    /// Returns the number of ticks run.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?period, "Lag monitor started");

        let mut ticks = 0_u64;
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            ticks += 1;
            let outcome = self.tick().await;
            tracing::debug!(tick = ticks, outcome = %outcome, "Tick finished");
        }

        tracing::info!(ticks, "Lag monitor stopped");
        ticks
    }
}
