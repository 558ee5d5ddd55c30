//! Host-routed HTTP forwarding.
//!
//! # Responsibilities
//! - Serve HTTP/1.1 and HTTP/2 on each accepted connection
//! - Resolve the `Host` header through the registry
//! - Forward to the selected backend and stream the response back
//!
//! # Design Decisions
//! - Unknown host = 404, unreachable backend = 502, no retries
//! - The request path and query are preserved; only the authority changes

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, StatusCode, Uri};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;

use crate::component::varz::Varz;
use crate::net::ConnectionHandler;
use crate::registry::Registry;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Connection handler that proxies requests to registered backends.
#[derive(Clone)]
pub struct ProxyHandler {
    registry: Arc<dyn Registry>,
    varz: Arc<Varz>,
    client: Client<HttpConnector, Body>,
}

impl ProxyHandler {
    pub fn new(registry: Arc<dyn Registry>, varz: Arc<Varz>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            registry,
            varz,
            client,
        }
    }

    async fn forward(&self, request: Request<Incoming>, peer: SocketAddr) -> Response<Body> {
        self.varz.record_request();

        let Some(host) = request_host(&request) else {
            self.varz.record_bad_request();
            return plain(StatusCode::BAD_REQUEST, "missing host");
        };

        let Some(entry) = self.registry.lookup(&host) else {
            self.varz.record_bad_request();
            tracing::debug!(host = %host, "No route registered");
            return plain(StatusCode::NOT_FOUND, "unknown route");
        };

        let (mut parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        parts.uri = match format!("http://{}{}", entry.backend_key(), path).parse::<Uri>() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(backend = %entry.backend_key(), error = %e, "Invalid backend uri");
                self.varz.record_upstream_error();
                return plain(StatusCode::BAD_GATEWAY, "invalid backend");
            }
        };
        if let Ok(value) = HeaderValue::from_str(&peer.ip().to_string()) {
            parts.headers.insert(X_FORWARDED_FOR, value);
        }

        match self
            .client
            .request(Request::from_parts(parts, Body::new(body)))
            .await
        {
            Ok(response) => response.map(Body::new),
            Err(e) => {
                tracing::warn!(backend = %entry.backend_key(), host = %host, error = %e, "Upstream error");
                self.varz.record_upstream_error();
                plain(StatusCode::BAD_GATEWAY, "upstream request failed")
            }
        }
    }
}

impl ConnectionHandler for ProxyHandler {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let handler = self.clone();
        let service = service_fn(move |request: Request<Incoming>| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.forward(request, peer).await) }
        });

        let builder = auto::Builder::new(TokioExecutor::new());
        if let Err(e) = builder
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            tracing::debug!(peer_addr = %peer, error = %e, "Connection ended with error");
        }
    }
}

/// Routable host of a request, lowercase and without port.
fn request_host<B>(request: &Request<B>) -> Option<String> {
    let raw = request
        .uri()
        .host()
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })?;

    let host = match raw.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => raw.as_str(),
    };
    let host = host.trim().to_lowercase();
    (!host.is_empty()).then_some(host)
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

impl std::fmt::Debug for ProxyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyHandler").finish_non_exhaustive()
    }
}
