//! Data models for the lag monitor.
//!
//! This module contains the samples read from and derived from the tipset
//! store, and the label set attached to every published value.

pub mod labels;
pub mod lag;

pub use labels::{LabelError, PublishLabels};
pub use lag::{DelaySample, LagSample};
