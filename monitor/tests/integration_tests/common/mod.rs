//! Common test utilities and helpers for integration tests.
//!
//! This module provides a seeded in-memory store, a fixed wall clock and a
//! mock Pushgateway wired to the real publisher.

use bell_monitor::lag_monitor::{Clock, LagMonitor, MonitorSettings};
use bell_monitor::publisher::PushGateway;
use chrono::{DateTime, TimeZone, Utc};
use shared::models::PublishLabels;
use shared::storage::InMemoryTipsetStore;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

/// Grouping path for the default labels.
pub const DEFAULT_GROUP_PATH: &str =
    "/metrics/job/filscan_bell_finalheight_delay/module/filscan/net/main-net";

/// Timestamp of the seeded tipset.
pub fn newest_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Wall-clock time five and a half minutes after [`newest_timestamp`].
pub fn five_and_a_half_minutes_later() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 30).unwrap()
}

/// Creates a store holding a single tipset at [`newest_timestamp`].
pub fn seeded_store() -> Arc<InMemoryTipsetStore> {
    let store = InMemoryTipsetStore::new_shared();
    store.insert(newest_timestamp()).unwrap();
    store
}

/// Returns a clock frozen at `now`.
pub fn fixed_clock(now: DateTime<Utc>) -> Clock {
    Arc::new(move || now)
}

/// Creates a publisher pointed at the mock server.
pub fn gateway(server: &MockServer) -> PushGateway {
    PushGateway::new(&server.uri(), Duration::from_secs(2)).unwrap()
}

/// Creates a lag monitor publishing to the mock server.
pub fn monitor_for(
    store: Arc<InMemoryTipsetStore>,
    server: &MockServer,
    clock: Clock,
) -> LagMonitor {
    LagMonitor::new(
        store,
        Arc::new(gateway(server)),
        PublishLabels::for_network("main-net"),
        MonitorSettings::default(),
    )
    .with_clock(clock)
}

/// Polls the mock server until it has seen `count` requests.
///
/// # Panics
///
/// Panics if the requests do not arrive within `timeout`.
pub async fn wait_for_requests(server: &MockServer, count: usize, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= count {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {count} request(s), got {}",
            received.len()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
