//! Bell Monitor Shared Library
//!
//! This crate contains the types and storage abstractions used by the
//! finalized-height lag monitor.
//!
//! # Modules
//!
//! - [`models`] - Lag samples, delay samples and publish labels
//! - [`storage`] - Tipset store traits and implementations
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use shared::models::{DelaySample, LagSample};
//!
//! let sample = LagSample::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
//! let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 30).unwrap();
//!
//! let delay = DelaySample::between(&sample, now);
//! assert_eq!(delay.seconds, 330.0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod models;
pub mod storage;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
