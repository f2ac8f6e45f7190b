//! Grouping labels attached to every published delay.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Module identifier the monitor publishes under.
pub const MODULE_LABEL_VALUE: &str = "filscan";

/// Network monitored by default.
pub const DEFAULT_NETWORK: &str = "main-net";

/// Errors raised while validating a label set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    /// The label name is not a valid Prometheus label name.
    #[error("Invalid label name: {0:?}")]
    InvalidName(String),

    /// The label name is reserved by the collector.
    #[error("Label name {0:?} is reserved")]
    Reserved(String),

    /// The same label name appears twice.
    #[error("Duplicate label name: {0:?}")]
    Duplicate(String),
}

/// An ordered set of key-value pairs identifying the monitored source.
///
/// The set is built once at startup and attached to every published sample,
/// so repeated pushes overwrite the same series at the collector.
///
/// # Example
///
/// ```
/// use shared::models::PublishLabels;
///
/// let labels = PublishLabels::for_network("calibration");
/// let pairs: Vec<_> = labels.iter().collect();
///
/// assert_eq!(pairs, vec![("module", "filscan"), ("net", "calibration")]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishLabels {
    pairs: Vec<(String, String)>,
}

impl PublishLabels {
    /// Creates an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the standard `module` + `net` label set for a network.
    #[must_use]
    pub fn for_network(network: impl Into<String>) -> Self {
        Self::new()
            .with("module", MODULE_LABEL_VALUE)
            .with("net", network)
    }

    /// Appends a label, keeping insertion order.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((name.into(), value.into()));
        self
    }

    /// Iterates over the labels in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns the value of a label, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Returns the number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if the set holds no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Validates the label names.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a name does not match `[a-zA-Z_][a-zA-Z0-9_]*`
    /// - a name is `job` or starts with `__`
    /// - a name appears more than once
    pub fn validate(&self) -> Result<(), LabelError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.len());

        for (name, _) in self.iter() {
            if !is_valid_label_name(name) {
                return Err(LabelError::InvalidName(name.to_string()));
            }
            if name == "job" || name.starts_with("__") {
                return Err(LabelError::Reserved(name.to_string()));
            }
            if seen.contains(&name) {
                return Err(LabelError::Duplicate(name.to_string()));
            }
            seen.push(name);
        }

        Ok(())
    }
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
