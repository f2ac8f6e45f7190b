//! Integration tests for publishing to the Pushgateway.
//!
//! Tests cover:
//! - Grouping URL and encoded body of a push
//! - Overwrite semantics across repeated pushes
//! - Rejections and unreachable collectors never failing a tick

use bell_monitor::lag_monitor::TickOutcome;
use bell_monitor::publisher::{PublishError, PushGateway};
use shared::models::PublishLabels;
use std::time::Duration;
use tokio_test::assert_ok;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{
    five_and_a_half_minutes_later, fixed_clock, gateway, monitor_for, seeded_store,
    DEFAULT_GROUP_PATH,
};

#[tokio::test]
async fn test_tick_pushes_delay_to_group() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(DEFAULT_GROUP_PATH))
        .and(body_string_contains("# TYPE filscan_bell_finalheight_delay gauge"))
        .and(body_string_contains("filscan_bell_finalheight_delay 330"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let monitor = monitor_for(
        seeded_store(),
        &server,
        fixed_clock(five_and_a_half_minutes_later()),
    );

    let outcome = monitor.tick().await;

    assert!(matches!(outcome, TickOutcome::Published(_)));
    assert_eq!(outcome.delay().unwrap().seconds, 330.0);
    server.verify().await;
}

#[tokio::test]
async fn test_repeated_ticks_push_to_the_same_group() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(DEFAULT_GROUP_PATH))
        .respond_with(ResponseTemplate::new(202))
        .expect(2)
        .mount(&server)
        .await;

    let monitor = monitor_for(seeded_store(), &server, fixed_clock(five_and_a_half_minutes_later()));

    monitor.tick().await;
    monitor.tick().await;

    server.verify().await;
}

#[tokio::test]
async fn test_empty_store_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = shared::storage::InMemoryTipsetStore::new_shared();
    let monitor = monitor_for(store, &server, fixed_clock(five_and_a_half_minutes_later()));

    let outcome = monitor.tick().await;

    assert!(matches!(outcome, TickOutcome::FetchFailed(_)));
    server.verify().await;
}

#[tokio::test]
async fn test_rejected_push_does_not_fail_tick() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_body_string("storage full"))
        .expect(2)
        .mount(&server)
        .await;

    let monitor = monitor_for(seeded_store(), &server, fixed_clock(five_and_a_half_minutes_later()));

    // Both ticks run; the failure of the first has no effect on the second
    assert!(matches!(monitor.tick().await, TickOutcome::Published(_)));
    assert!(matches!(monitor.tick().await, TickOutcome::Published(_)));
    server.verify().await;
}

#[tokio::test]
async fn test_push_reports_rejection_details() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad label"))
        .mount(&server)
        .await;

    let result = gateway(&server)
        .push(12.5, &PublishLabels::for_network("main-net"))
        .await;

    match result {
        Err(PublishError::Rejected { status, body }) => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(body, "bad label");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_push_accepts_202() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(DEFAULT_GROUP_PATH))
        .and(body_string_contains("filscan_bell_finalheight_delay 0.5"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(
        gateway(&server)
            .push(0.5, &PublishLabels::for_network("main-net"))
            .await
    );
}

#[tokio::test]
async fn test_unreachable_gateway_is_swallowed() {
    // Nothing listens on port 1
    let publisher = PushGateway::new("127.0.0.1:1", Duration::from_secs(1)).unwrap();

    let result = publisher
        .push(1.0, &PublishLabels::for_network("main-net"))
        .await;
    assert!(matches!(result, Err(PublishError::Transport(_))));

    let monitor = bell_monitor::LagMonitor::new(
        seeded_store(),
        std::sync::Arc::new(publisher),
        PublishLabels::for_network("main-net"),
        bell_monitor::lag_monitor::MonitorSettings::default(),
    )
    .with_clock(fixed_clock(five_and_a_half_minutes_later()));

    assert!(matches!(monitor.tick().await, TickOutcome::Published(_)));
}
