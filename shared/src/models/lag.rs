//! Lag data model.
//!
//! Defines the timestamp read from the newest tipset and the delay derived
//! from it at sample time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The newest tipset's minimum timestamp, as read from the store.
///
/// A `LagSample` is a read-only snapshot taken once per tick and dropped as
/// soon as the delay has been computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagSample {
    /// Minimum block timestamp of the most recently inserted tipset.
    pub min_timestamp: DateTime<Utc>,
}

impl LagSample {
    /// Creates a new lag sample.
    #[must_use]
    pub fn new(min_timestamp: DateTime<Utc>) -> Self {
        Self { min_timestamp }
    }
}

/// Delay between the wall clock and a [`LagSample`], in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelaySample {
    /// Delay in seconds with sub-second precision.
    pub seconds: f64,
    /// Wall-clock time the delay was computed at.
    pub sampled_at: DateTime<Utc>,
    /// Timestamp the delay was measured against.
    pub min_timestamp: DateTime<Utc>,
}

impl DelaySample {
    /// Computes the delay of `sample` as observed at `now`.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use shared::models::{DelaySample, LagSample};
    ///
    /// let now = Utc::now();
    /// let sample = LagSample::new(now - Duration::milliseconds(1500));
    ///
    /// let delay = DelaySample::between(&sample, now);
    /// assert!((delay.seconds - 1.5).abs() < 1e-9);
    /// ```
    #[must_use]
    pub fn between(sample: &LagSample, now: DateTime<Utc>) -> Self {
        let elapsed = now.signed_duration_since(sample.min_timestamp);

        // Cast is acceptable here: microsecond deltas stay far below f64's exact range
        #[allow(clippy::cast_precision_loss)]
        let seconds = match elapsed.num_microseconds() {
            Some(micros) => micros as f64 / 1_000_000.0,
            None => elapsed.num_milliseconds() as f64 / 1_000.0,
        };

        Self {
            seconds,
            sampled_at: now,
            min_timestamp: sample.min_timestamp,
        }
    }

    /// Returns true if the stored timestamp lies ahead of the sample time.
    #[must_use]
    pub fn is_clock_skewed(&self) -> bool {
        self.seconds < 0.0
    }
}
