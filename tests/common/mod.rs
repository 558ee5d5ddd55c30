//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use edge_router::bus::MemoryBus;
use edge_router::config::RouterConfig;
use edge_router::net::ConnectionHandler;
use edge_router::{LifecycleCoordinator, RouteRegistry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a simple mock backend that answers every request with `response`.
///
/// Returns the bound address.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        read_request_head(&mut socket).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request_head(socket: &mut TcpStream) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}

/// Send a bodyless HTTP/1.1 request with the given `Host` and return the raw
/// response.
pub async fn raw_get(addr: SocketAddr, host: &str, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Config for a router bound to loopback with the status endpoint off.
pub fn test_config() -> RouterConfig {
    let mut config = RouterConfig::default();
    config.nats.host = "127.0.0.1:4222".to_string();
    config.wait_before_exiting_secs = 1;
    config
}

pub struct Harness {
    pub coordinator: LifecycleCoordinator,
    pub bus: Arc<MemoryBus>,
    pub registry: Arc<RouteRegistry>,
}

pub fn harness(config: RouterConfig) -> Harness {
    let bus = Arc::new(MemoryBus::new());
    let registry = Arc::new(RouteRegistry::new());
    let coordinator = LifecycleCoordinator::new(config, registry.clone(), bus.clone())
        .with_listen_addr("127.0.0.1:0".parse().unwrap());
    Harness {
        coordinator,
        bus,
        registry,
    }
}

/// Poll `condition` every 10ms until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(within: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Handler that keeps each connection open for a fixed time.
pub struct HoldFor(pub Duration);

impl ConnectionHandler for HoldFor {
    async fn handle(&self, stream: TcpStream, _peer: SocketAddr) {
        tokio::time::sleep(self.0).await;
        drop(stream);
    }
}
