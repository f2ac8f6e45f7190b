//! Metric publishing to a Prometheus Pushgateway.
//!
//! Each publish builds a one-gauge registry, encodes it in the Prometheus
//! text format and `PUT`s it to the grouping URL for the monitor's labels,
//! replacing whatever the group held before. Publishing is best-effort:
//! failures are logged and never returned to the monitor loop.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use shared::models::{DelaySample, PublishLabels};
use std::time::Duration;
use thiserror::Error;

/// Name of the published gauge. Also used as the Pushgateway job name.
pub const DELAY_METRIC_NAME: &str = "filscan_bell_finalheight_delay";

const DELAY_METRIC_HELP: &str =
    "Seconds between now and the minimum timestamp of the newest finalized tipset";

/// Errors that can occur while pushing a metric.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The endpoint address is not a usable URL.
    #[error("Invalid push address {address:?}: {reason}")]
    InvalidAddress {
        /// The configured address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Building or encoding the gauge failed.
    #[error("Failed to encode metric: {0}")]
    Encode(#[from] prometheus::Error),

    /// The request could not be sent or no response arrived.
    #[error("Push request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The Pushgateway answered with an unexpected status.
    #[error("Pushgateway rejected push with status {status}: {body}")]
    Rejected {
        /// HTTP status returned.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Destination for delay samples.
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Publishes one delay sample under the given labels.
    ///
    /// Implementations swallow and log their own failures.
    async fn publish(&self, delay: &DelaySample, labels: &PublishLabels);
}

/// Pushgateway client for the delay gauge.
#[derive(Debug, Clone)]
pub struct PushGateway {
    client: reqwest::Client,
    base_url: Url,
    job: String,
}

impl PushGateway {
    /// Creates a client for the Pushgateway at `address`.
    ///
    /// An address without a scheme is treated as `http://`. `timeout` bounds
    /// every push request.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed as a base URL or the
    /// HTTP client cannot be built.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, PublishError> {
        let base_url = parse_address(address)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            job: DELAY_METRIC_NAME.to_string(),
        })
    }

    /// Returns the grouping URL for the job and `labels`.
    ///
    /// Label values that are empty or contain `/` are sent in the
    /// `name@base64/value` form.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot carry path segments.
    pub fn grouping_url(&self, labels: &PublishLabels) -> Result<Url, PublishError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| PublishError::InvalidAddress {
                    address: self.base_url.to_string(),
                    reason: "cannot be a base URL".to_string(),
                })?;
            segments.pop_if_empty().push("metrics");

            let (name, value) = encode_grouping_pair("job", &self.job);
            segments.push(&name).push(&value);

            for (label, value) in labels.iter() {
                let (name, value) = encode_grouping_pair(label, value);
                segments.push(&name).push(&value);
            }
        }
        Ok(url)
    }

    /// Pushes `value` as the delay gauge, replacing the group's metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, the request cannot be sent, or
    /// the Pushgateway answers with anything but 200 or 202.
    pub async fn push(&self, value: f64, labels: &PublishLabels) -> Result<(), PublishError> {
        let (content_type, body) = encode_gauge(value)?;
        let url = self.grouping_url(labels)?;

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::ACCEPTED {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(PublishError::Rejected { status, body })
    }
}

#[async_trait]
impl MetricSink for PushGateway {
    async fn publish(&self, delay: &DelaySample, labels: &PublishLabels) {
        match self.push(delay.seconds, labels).await {
            Ok(()) => {
                tracing::debug!(
                    job = %self.job,
                    endpoint = %self.base_url,
                    delay_seconds = delay.seconds,
                    "Pushed delay gauge"
                );
            }
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.base_url,
                    error = %e,
                    "Failed to push delay gauge"
                );
            }
        }
    }
}

/// Sink used when no Pushgateway address is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSink;

#[async_trait]
impl MetricSink for DisabledSink {
    async fn publish(&self, delay: &DelaySample, _labels: &PublishLabels) {
        tracing::debug!(
            delay_seconds = delay.seconds,
            "No push address configured, skipping publish"
        );
    }
}

/// Encodes a single delay gauge in the Prometheus text format.
///
/// Returns the content type together with the encoded body.
///
/// # Errors
///
/// Returns an error if the gauge cannot be registered or encoded.
pub fn encode_gauge(value: f64) -> Result<(String, Vec<u8>), PublishError> {
    let gauge = Gauge::with_opts(Opts::new(DELAY_METRIC_NAME, DELAY_METRIC_HELP))?;
    gauge.set(value);

    let registry = Registry::new();
    registry.register(Box::new(gauge))?;

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;

    Ok((encoder.format_type().to_string(), buffer))
}

fn parse_address(address: &str) -> Result<Url, PublishError> {
    let trimmed = address.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| PublishError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(PublishError::InvalidAddress {
            address: address.to_string(),
            reason: "cannot be a base URL".to_string(),
        });
    }

    Ok(url)
}

fn encode_grouping_pair(name: &str, value: &str) -> (String, String) {
    if value.is_empty() {
        (format!("{name}@base64"), "=".to_string())
    } else if value.contains('/') {
        (format!("{name}@base64"), URL_SAFE_NO_PAD.encode(value))
    } else {
        (name.to_string(), value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(address: &str) -> PushGateway {
        PushGateway::new(address, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_grouping_url_default_labels() {
        let gw = gateway("http://pushgateway:9091");
        let url = gw
            .grouping_url(&PublishLabels::for_network("main-net"))
            .unwrap();

        assert_eq!(
            url.as_str(),
            "http://pushgateway:9091/metrics/job/filscan_bell_finalheight_delay/module/filscan/net/main-net"
        );
    }

    #[test]
    fn test_address_without_scheme_gets_http() {
        let gw = gateway("localhost:9091");
        let url = gw.grouping_url(&PublishLabels::new()).unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:9091/metrics/job/filscan_bell_finalheight_delay"
        );
    }

    #[test]
    fn test_address_with_trailing_slash_and_prefix() {
        let gw = gateway("https://metrics.example.com/push/");
        let url = gw.grouping_url(&PublishLabels::new()).unwrap();

        assert_eq!(
            url.as_str(),
            "https://metrics.example.com/push/metrics/job/filscan_bell_finalheight_delay"
        );
    }

    #[test]
    fn test_label_values_with_slash_use_base64() {
        let gw = gateway("http://pgw:9091");
        let labels = PublishLabels::new().with("net", "main/net");

        let url = gw.grouping_url(&labels).unwrap();

        assert!(url.as_str().ends_with("/net@base64/bWFpbi9uZXQ"));
    }

    #[test]
    fn test_empty_label_value_uses_base64_marker() {
        let gw = gateway("http://pgw:9091");
        let labels = PublishLabels::new().with("net", "");

        let url = gw.grouping_url(&labels).unwrap();

        assert!(url.as_str().ends_with("/net@base64/="));
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let result = PushGateway::new("http://[::1", Duration::from_secs(1));

        assert!(matches!(result, Err(PublishError::InvalidAddress { .. })));
    }

    #[test]
    fn test_encode_gauge_text_format() {
        let (content_type, body) = encode_gauge(330.0).unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("# TYPE filscan_bell_finalheight_delay gauge"));
        assert!(text.contains("filscan_bell_finalheight_delay 330"));
    }

    #[test]
    fn test_encode_gauge_fractional_value() {
        let (_, body) = encode_gauge(1.25).unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(text.contains("filscan_bell_finalheight_delay 1.25"));
    }
}
