//! Registrations arriving on the bus drive proxying and the status endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, harness, raw_get, start_mock_backend, test_config};
use edge_router::bus::{MemoryBus, REGISTER_TOPIC, UNREGISTER_TOPIC};
use edge_router::component::status::HEALTHZ_OK;
use edge_router::component::varz::Varz;
use edge_router::component::{self, Component, ComponentSources, COMPONENT_TYPE};
use edge_router::net::ConnectionTracker;
use edge_router::{Registry, RouteRegistry, Shutdown, ShutdownState};
use serde_json::Value;

fn register_payload(port: u16, uri: &str) -> String {
    format!(r#"{{"host":"127.0.0.1","port":{},"uris":["{}"]}}"#, port, uri)
}

#[tokio::test]
async fn proxies_registered_routes() {
    let backend = start_mock_backend("hello from backend").await;

    let h = harness(test_config());
    let running = h.coordinator.start().await.unwrap();
    let addr = running.local_addr();
    let varz = running.varz();

    let shutdown = Shutdown::new();
    let server = tokio::spawn(running.serve_proxy(shutdown.requested()));

    h.bus
        .inject_payload(REGISTER_TOPIC, register_payload(backend.port(), "app.example.com"));
    let registry = h.registry.clone();
    assert!(eventually(Duration::from_secs(2), || registry.lookup("app.example.com").is_some()).await);

    let response = raw_get(addr, "App.Example.com:80", "/hello?x=1").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.ends_with("hello from backend"));

    let response = raw_get(addr, "unknown.example.com", "/").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{}", response);

    h.bus
        .inject_payload(UNREGISTER_TOPIC, register_payload(backend.port(), "app.example.com"));
    assert!(eventually(Duration::from_secs(2), || registry.route_count() == 0).await);
    let response = raw_get(addr, "app.example.com", "/hello").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{}", response);

    let counters = varz.snapshot();
    assert_eq!(counters.registers, 1);
    assert_eq!(counters.unregisters, 1);
    assert_eq!(counters.requests, 3);

    shutdown.trigger();
    assert_eq!(server.await.unwrap(), ShutdownState::Drained);
}

#[tokio::test]
async fn unreachable_backend_is_bad_gateway() {
    // Reserve a port, then free it so nothing is listening there.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let h = harness(test_config());
    let running = h.coordinator.start().await.unwrap();
    let addr = running.local_addr();
    let shutdown = Shutdown::new();
    let server = tokio::spawn(running.serve_proxy(shutdown.requested()));

    h.bus.inject_payload(REGISTER_TOPIC, register_payload(port, "gone.example.com"));
    let registry = h.registry.clone();
    assert!(eventually(Duration::from_secs(2), || registry.route_count() == 1).await);

    let response = raw_get(addr, "gone.example.com", "/").await;
    assert!(response.starts_with("HTTP/1.1 502"), "{}", response);

    shutdown.trigger();
    assert_eq!(server.await.unwrap(), ShutdownState::Drained);
}

#[tokio::test]
async fn malformed_registrations_are_counted_and_skipped() {
    let h = harness(test_config());
    let running = h.coordinator.start().await.unwrap();
    let varz = running.varz();

    h.bus.inject_payload(REGISTER_TOPIC, "{not json");
    h.bus
        .inject_payload(REGISTER_TOPIC, register_payload(61001, "ok.example.com"));

    let registry = h.registry.clone();
    assert!(eventually(Duration::from_secs(2), || registry.route_count() == 1).await);
    assert_eq!(varz.snapshot().malformed_messages, 1);
}

#[tokio::test]
async fn status_endpoint_requires_credentials() {
    let mut config = test_config();
    config.status.user = "varz".to_string();
    config.status.password = "s3cret".to_string();

    let registry: Arc<dyn Registry> = Arc::new(RouteRegistry::new());
    let varz = Arc::new(Varz::new(registry, ConnectionTracker::new()));
    let sources = ComponentSources::new(&config, varz).unwrap();
    let component = Component {
        kind: COMPONENT_TYPE.to_string(),
        index: 3,
        host: "127.0.0.1".to_string(),
        credentials: vec!["varz".to_string(), "s3cret".to_string()],
        uuid: "test-uuid".to_string(),
        start: 0,
    };

    let bus = Arc::new(MemoryBus::new());
    let registration = component::register(
        component,
        sources,
        bus,
        Some("127.0.0.1:0".parse().unwrap()),
    )
    .await
    .unwrap();
    let base = format!("http://{}", registration.status_addr.unwrap());
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/healthz", base))
        .basic_auth("varz", Some("s3cret"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), HEALTHZ_OK);

    let res = client.get(format!("{}/healthz", base)).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(format!("{}/varz", base))
        .basic_auth("varz", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let varz: Value = client
        .get(format!("{}/varz", base))
        .basic_auth("varz", Some("s3cret"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(varz["type"], "Router");
    assert_eq!(varz["index"], 3);
    assert_eq!(varz["routes"], 0);
    assert_eq!(varz["config"]["status"]["password"], "[redacted]");
}
