//! Startup ordering and shutdown draining against an in-process bus.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, harness, test_config, HoldFor};
use edge_router::bus::{
    ACTIVE_APPS_TOPIC, COMPONENT_ANNOUNCE_TOPIC, COMPONENT_DISCOVER_TOPIC, REGISTER_TOPIC,
    START_TOPIC, UNREGISTER_TOPIC,
};
use edge_router::lifecycle::StartupError;
use edge_router::snapshot::decode_snapshot;
use edge_router::{Registry, Shutdown, ShutdownState};
use tokio::net::TcpStream;
use tracing_test::traced_test;

#[tokio::test]
async fn announces_after_subscriptions_are_live() {
    let h = harness(test_config());
    let running = h.coordinator.start().await.unwrap();

    let topics: Vec<String> = h.bus.published().into_iter().map(|p| p.topic).collect();
    assert_eq!(topics, vec![COMPONENT_ANNOUNCE_TOPIC, START_TOPIC]);

    assert_eq!(h.bus.subscriber_count(REGISTER_TOPIC), 1);
    assert_eq!(h.bus.subscriber_count(UNREGISTER_TOPIC), 1);
    assert_eq!(h.bus.subscriber_count(COMPONENT_DISCOVER_TOPIC), 1);
    assert!(running.registration().status_addr.is_none());
    assert!(!running.ingest().register.is_finished());
    assert!(!running.ingest().unregister.is_finished());
}

#[tokio::test]
async fn failed_component_announcement_is_fatal() {
    let h = harness(test_config());
    h.bus.fail_publishes(true);

    let result = h.coordinator.start().await;
    assert!(matches!(result, Err(StartupError::Component(_))));
}

#[tokio::test]
async fn snapshots_follow_configuration() {
    let h = harness(test_config());
    let running = h.coordinator.start().await.unwrap();
    assert!(!running.snapshots_scheduled());

    let mut config = test_config();
    config.flush_apps_interval_secs = 1;
    let h = harness(config);
    let running = h.coordinator.start().await.unwrap();
    assert!(running.snapshots_scheduled());
}

#[tokio::test]
async fn registrations_reach_the_snapshot() {
    let mut config = test_config();
    config.flush_apps_interval_secs = 1;
    let h = harness(config);
    let _running = h.coordinator.start().await.unwrap();

    let delivered = h.bus.inject_payload(
        REGISTER_TOPIC,
        r#"{"host":"10.0.0.7","port":61000,"uris":["shop.example.com"]}"#,
    );
    assert_eq!(delivered, 1);

    let registry = h.registry.clone();
    assert!(eventually(Duration::from_secs(2), || registry.route_count() == 1).await);

    let bus = h.bus.clone();
    assert!(
        eventually(Duration::from_secs(3), || !bus.published_on(ACTIVE_APPS_TOPIC).is_empty())
            .await
    );

    let snapshot = &h.bus.published_on(ACTIVE_APPS_TOPIC)[0];
    let entries = decode_snapshot(&snapshot.payload).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].backend_key(), "10.0.0.7:61000");
}

#[tokio::test]
async fn occupied_port_fails_startup() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();

    let h = harness(test_config());
    let result = h.coordinator.with_listen_addr(addr).start().await;

    assert!(matches!(result, Err(StartupError::Listen(_))));
}

#[traced_test]
#[tokio::test]
async fn drains_before_deadline() {
    let h = harness(test_config());
    let running = h.coordinator.start().await.unwrap();
    let addr = running.local_addr();
    let handle = running.listener_handle();

    let shutdown = Shutdown::new();
    let requested = shutdown.requested();

    let (state, _client) = tokio::join!(
        running.serve(Arc::new(HoldFor(Duration::from_millis(100))), requested),
        async {
            let client = TcpStream::connect(addr).await.unwrap();
            assert!(eventually(Duration::from_secs(2), || handle.active_connections() == 1).await);
            shutdown.trigger();
            client
        }
    );

    assert_eq!(state, ShutdownState::Drained);
    assert!(handle.is_closed());
    assert!(logs_contain("Shutdown gracefully"));
    assert!(!logs_contain("Shutdown deadline exceeded"));
}

#[traced_test]
#[tokio::test]
async fn deadline_abandons_stuck_connections() {
    let h = harness(test_config());
    let running = h.coordinator.start().await.unwrap();
    let addr = running.local_addr();
    let handle = running.listener_handle();

    let shutdown = Shutdown::new();
    let requested = shutdown.requested();
    let started = tokio::time::Instant::now();

    let (state, _clients) = tokio::join!(
        running.serve(Arc::new(HoldFor(Duration::from_secs(5))), requested),
        async {
            let mut clients = Vec::new();
            for _ in 0..5 {
                clients.push(TcpStream::connect(addr).await.unwrap());
            }
            assert!(eventually(Duration::from_secs(2), || handle.active_connections() == 5).await);
            shutdown.trigger();
            clients
        }
    );

    assert_eq!(state, ShutdownState::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(handle.active_connections(), 5);
    assert!(logs_contain("Shutdown deadline exceeded"));
    assert!(!logs_contain("Shutdown gracefully"));
}

#[tokio::test]
async fn closed_listener_refuses_new_connections() {
    let h = harness(test_config());
    let running = h.coordinator.start().await.unwrap();
    let addr = running.local_addr();

    let state = running
        .serve(Arc::new(HoldFor(Duration::ZERO)), std::future::ready(()))
        .await;

    assert_eq!(state, ShutdownState::Drained);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_warmup_skips_serving() {
    let mut config = test_config();
    config.proxy_warmup_secs = 5;
    let h = harness(config);
    let running = h.coordinator.start().await.unwrap();
    let handle = running.listener_handle();

    let started = tokio::time::Instant::now();
    let state = running
        .serve(Arc::new(HoldFor(Duration::ZERO)), std::future::ready(()))
        .await;

    assert_eq!(state, ShutdownState::Drained);
    assert!(handle.is_closed());
    assert!(started.elapsed() >= Duration::from_secs(5));
}
