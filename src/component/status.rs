//! Status endpoint: `/healthz` and `/varz` behind basic auth.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::component::varz::VarzSnapshot;
use crate::component::{Component, ComponentError, ComponentSources};

pub const HEALTHZ_OK: &str = "ok";

#[derive(Clone)]
pub struct StatusState {
    component: Arc<Component>,
    sources: ComponentSources,
}

impl StatusState {
    pub fn new(component: Arc<Component>, sources: ComponentSources) -> Self {
        Self { component, sources }
    }
}

#[derive(Serialize)]
struct VarzDocument<'a> {
    #[serde(flatten)]
    component: &'a Component,
    config: &'a serde_json::Value,
    #[serde(flatten)]
    varz: VarzSnapshot,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/varz", get(varz))
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the status endpoint and serve it in the background.
pub async fn serve(
    addr: SocketAddr,
    state: StatusState,
) -> Result<(SocketAddr, JoinHandle<()>), ComponentError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ComponentError::StatusBind { addr, source })?;
    let local = listener
        .local_addr()
        .map_err(|source| ComponentError::StatusBind { addr, source })?;

    tracing::info!(address = %local, "Status endpoint listening");

    let app = router(state);
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Status endpoint stopped");
        }
    });
    Ok((local, task))
}

async fn healthz() -> &'static str {
    HEALTHZ_OK
}

async fn varz(State(state): State<StatusState>) -> Response {
    let document = VarzDocument {
        component: &state.component,
        config: &state.sources.config,
        varz: state.sources.varz.snapshot(),
    };
    json_or_500(&document)
}

fn json_or_500<T: Serialize>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(json) => Json(json).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize varz");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn basic_auth(
    State(state): State<StatusState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .is_some_and(|pair| credentials_match(&state.component.credentials, &pair));

    if authorized {
        return next.run(request).await;
    }

    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"router\""),
    );
    response
}

fn credentials_match(credentials: &[String], pair: &str) -> bool {
    match (credentials, pair.split_once(':')) {
        ([user, password], Some((u, p))) => !user.is_empty() && user == u && password == p,
        _ => false,
    }
}
