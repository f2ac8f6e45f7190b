//! Integration tests for the monitor lifecycle.
//!
//! Tests cover:
//! - Connecting, ticking and publishing until shutdown
//! - Releasing the store exactly once
//! - Fatal startup when every connection attempt fails

use bell_monitor::publisher::{DisabledSink, MetricSink};
use bell_monitor::{Config, MonitorState, Supervisor};
use shared::storage::{InMemoryConnector, InMemoryTipsetStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{
    five_and_a_half_minutes_later, fixed_clock, gateway, seeded_store, wait_for_requests,
    DEFAULT_GROUP_PATH,
};

fn fast_config() -> Config {
    Config {
        interval: Duration::from_millis(200),
        retry_backoff: Duration::from_millis(10),
        fetch_timeout: Duration::from_secs(1),
        publish_timeout: Duration::from_secs(1),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_runs_until_shutdown_and_releases_store_once() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(DEFAULT_GROUP_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = seeded_store();
    let connector = InMemoryConnector::new(Arc::clone(&store)).failing(1);
    let sink: Arc<dyn MetricSink> = Arc::new(gateway(&server));
    let shutdown = CancellationToken::new();
    let supervisor = Arc::new(
        Supervisor::new(fast_config(), shutdown.clone())
            .with_clock(fixed_clock(five_and_a_half_minutes_later())),
    );

    let handle = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run(&connector, sink).await }
    });

    wait_for_requests(&server, 2, Duration::from_secs(5)).await;
    assert_eq!(supervisor.state(), MonitorState::Running);

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(supervisor.state(), MonitorState::Terminated);
    assert_eq!(store.close_calls(), 1);
    assert!(store.is_closed());

    // No tick starts once shutdown has been observed
    let pushes = server.received_requests().await.unwrap().len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), pushes);

    let body = String::from_utf8(server.received_requests().await.unwrap()[0].body.clone()).unwrap();
    assert!(body.contains("filscan_bell_finalheight_delay 330"));
}

#[tokio::test]
async fn test_reaches_running_then_terminated() {
    let store = seeded_store();
    let connector = InMemoryConnector::new(Arc::clone(&store));
    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::new(fast_config(), shutdown.clone());
    let mut states = supervisor.subscribe();
    assert_eq!(supervisor.state(), MonitorState::Uninitialized);

    let observer = tokio::spawn(async move {
        states
            .wait_for(|state| *state == MonitorState::Running)
            .await
            .unwrap();
        shutdown.cancel();
        states
            .wait_for(|state| *state == MonitorState::Terminated)
            .await
            .is_ok()
    });

    supervisor
        .run(&connector, Arc::new(DisabledSink))
        .await
        .unwrap();

    assert!(observer.await.unwrap());
    assert_eq!(supervisor.state(), MonitorState::Terminated);
    assert_eq!(store.close_calls(), 1);
}

#[tokio::test]
async fn test_every_connection_attempt_failing_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = InMemoryTipsetStore::new_shared();
    store
        .insert(super::common::newest_timestamp())
        .unwrap();
    let connector = InMemoryConnector::new(Arc::clone(&store)).failing(5);
    let config = Config {
        connect_retries: 4,
        ..fast_config()
    };
    let supervisor = Supervisor::new(config, CancellationToken::new());

    let result = supervisor.run(&connector, Arc::new(gateway(&server))).await;

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("failed after 4 attempt(s)"));
    assert_eq!(connector.attempts(), 4);
    assert_eq!(store.fetch_calls(), 0);
    assert_eq!(supervisor.state(), MonitorState::Terminated);
    server.verify().await;
}
