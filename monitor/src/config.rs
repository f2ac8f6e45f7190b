//! Monitor configuration module.
//!
//! Configuration is read once at startup from command-line flags, with
//! environment variables as the fallback default. The resulting [`Config`]
//! is immutable and handed to the supervisor.

use crate::retry::RetryPolicy;
use clap::{Parser, ValueEnum};
use shared::models::{LabelError, PublishLabels};
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

/// Default `MongoDB` connection string.
pub const DEFAULT_MONGO_DSN: &str = "mongodb://localhost:27017";

/// Errors raised while turning [`Args`] into a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of its allowed range.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// The publish labels are not valid Prometheus labels.
    #[error("Invalid publish labels: {0}")]
    Labels(#[from] LabelError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Command-line arguments.
///
/// Every flag falls back to the environment variable named next to it:
/// - `MONGO_DSN`: `MongoDB` connection string (default: `mongodb://localhost:27017`)
/// - `PUSH_ADDRESS`: Pushgateway address (default: unset, publishing disabled)
/// - `INTERVAL`: poll interval in minutes (default: 1)
/// - `CONNECT_RETRIES`: connection attempts before giving up (default: 3)
#[derive(Debug, Clone, Parser, Validate)]
#[command(name = "bell-monitor")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// `MongoDB` connection string
    #[arg(long, env = "MONGO_DSN", default_value = DEFAULT_MONGO_DSN)]
    #[validate(length(min = 1, message = "Connection string cannot be empty"))]
    pub mongo_dsn: String,

    /// Address of the Pushgateway to send metrics to
    #[arg(long, env = "PUSH_ADDRESS", default_value = "")]
    pub push_address: String,

    /// Interval in minutes to check the delay
    #[arg(long, env = "INTERVAL", default_value_t = 1)]
    #[validate(range(min = 1, max = 1440))]
    pub interval: u64,

    /// Interval in seconds; overrides `--interval` when set
    #[arg(long, env = "INTERVAL_SECONDS")]
    #[validate(range(min = 1, max = 86400))]
    pub interval_seconds: Option<u64>,

    /// Connection attempts before startup fails
    #[arg(long, env = "CONNECT_RETRIES", default_value_t = 3)]
    #[validate(range(min = 1, max = 100))]
    pub connect_retries: u32,

    /// Pause between connection attempts, in seconds
    #[arg(long, env = "RETRY_BACKOFF_SECONDS", default_value_t = 2)]
    #[validate(range(max = 300))]
    pub retry_backoff_seconds: u64,

    /// Bound on connecting to the store, in seconds
    #[arg(long, env = "CONNECT_TIMEOUT_SECONDS", default_value_t = 10)]
    #[validate(range(min = 1, max = 300))]
    pub connect_timeout_seconds: u64,

    /// Bound on each newest-tipset query, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECONDS", default_value_t = 30)]
    #[validate(range(min = 1, max = 300))]
    pub fetch_timeout_seconds: u64,

    /// Bound on each push to the Pushgateway, in seconds
    #[arg(long, env = "PUBLISH_TIMEOUT_SECONDS", default_value_t = 10)]
    #[validate(range(min = 1, max = 300))]
    pub publish_timeout_seconds: u64,

    /// Network identifier attached as the `net` label
    #[arg(long, env = "NETWORK", default_value = shared::models::labels::DEFAULT_NETWORK)]
    #[validate(length(min = 1, message = "Network cannot be empty"))]
    pub network: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Immutable monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `MongoDB` connection string.
    pub mongo_dsn: String,
    /// Pushgateway address; `None` disables publishing.
    pub push_address: Option<String>,
    /// Time between ticks.
    pub interval: Duration,
    /// Connection attempts before startup fails.
    pub connect_retries: u32,
    /// Pause between connection attempts.
    pub retry_backoff: Duration,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Bound on a single fetch.
    pub fetch_timeout: Duration,
    /// Bound on a single publish.
    pub publish_timeout: Duration,
    /// Labels attached to every published sample.
    pub labels: PublishLabels,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Config {
    /// Parses flags and environment variables into a configuration.
    ///
    /// Exits the process with a usage message if the flags cannot be parsed.
    ///
    /// # Errors
    ///
    /// Returns an error if a value fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(Args::parse())
    }

    /// Validates `args` and converts them into a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a numeric value is out of range
    /// - the connection string or network is empty
    /// - the label set is invalid
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        args.validate()?;

        let labels = PublishLabels::for_network(args.network);
        labels.validate()?;

        let interval = match args.interval_seconds {
            Some(seconds) => Duration::from_secs(seconds),
            None => Duration::from_secs(args.interval * 60),
        };

        let push_address = Some(args.push_address.trim().to_string()).filter(|a| !a.is_empty());

        Ok(Self {
            mongo_dsn: args.mongo_dsn,
            push_address,
            interval,
            connect_retries: args.connect_retries,
            retry_backoff: Duration::from_secs(args.retry_backoff_seconds),
            connect_timeout: Duration::from_secs(args.connect_timeout_seconds),
            fetch_timeout: Duration::from_secs(args.fetch_timeout_seconds),
            publish_timeout: Duration::from_secs(args.publish_timeout_seconds),
            labels,
            log_format: args.log_format,
        })
    }

    /// Returns the retry policy for the initial store connection.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.connect_retries, self.retry_backoff)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_dsn: DEFAULT_MONGO_DSN.to_string(),
            push_address: None,
            interval: Duration::from_secs(60),
            connect_retries: 3,
            retry_backoff: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(10),
            labels: PublishLabels::for_network(shared::models::labels::DEFAULT_NETWORK),
            log_format: LogFormat::Text,
        }
    }
}
