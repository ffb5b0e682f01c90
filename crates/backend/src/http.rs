//! The distributor-facing web api.
//!
//! Two data endpoints: a one-shot snapshot of a distributor's share of
//! resources, and a long-lived stream whose first frame is a prime diff
//! carrying everything currently owned, followed by one NDJSON-framed
//! diff per change. Frames on one stream arrive in the order the
//! backend observed the changes.

use crate::metrics;
use crate::Config;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use culvert_api::*;
use culvert_core::{BackendResources, EVENT_CHANNEL_CAPACITY};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

/// Shared state of the api handlers.
#[derive(Clone)]
pub struct AppState {
    resources: Arc<BackendResources>,
    /// bearer token to distributor name
    tokens: Arc<HashMap<String, String>>,
    prometheus: PrometheusHandle,
    /// open streams end when this fires, so shutdown can drain them
    shutdown: tokio::sync::watch::Receiver<bool>,
}

impl AppState {
    /// Assemble the handler state, inverting the configured
    /// distributor-to-token map for lookup by token.
    pub fn new(
        resources: Arc<BackendResources>,
        config: &Config,
        prometheus: PrometheusHandle,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        let tokens = config
            .backend
            .api_tokens
            .iter()
            .map(|(dist, token)| (token.clone(), dist.clone()))
            .collect();
        Self {
            resources,
            tokens: Arc::new(tokens),
            prometheus,
            shutdown,
        }
    }
}

/// Build the api router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/resources", get(handle_resources))
        .route("/resource-stream", get(handle_resource_stream))
        .with_state(state)
}

/// Serve the api on the given listener until the shutdown signal fires.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> CvtResult<()> {
    tracing::info!(addr = ?listener.local_addr(), "api listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| CvtError::other_src("serving api", e))
}

/// Bind the configured address and serve.
pub async fn bind_and_serve(
    config: &Config,
    state: AppState,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> CvtResult<()> {
    let listener =
        tokio::net::TcpListener::bind(config.backend.web_api.api_address)
            .await
            .map_err(|e| CvtError::other_src("binding api address", e))?;
    serve(listener, state, shutdown).await
}

#[derive(serde::Deserialize)]
struct ResourceQuery {
    /// Comma-separated resource type tags.
    #[serde(default)]
    types: String,
}

impl ResourceQuery {
    fn types(&self) -> Vec<String> {
        self.types
            .split(',')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }
}

/// Resolve the calling distributor from the bearer token.
fn authorize(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<String, Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match token.and_then(|t| state.tokens.get(t)) {
        Some(dist) => Ok(dist.clone()),
        None => Err((StatusCode::UNAUTHORIZED, "Unauthorized")
            .into_response()),
    }
}

async fn handle_health() -> impl IntoResponse {
    axum::Json(serde_json::json!({}))
}

async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus.render()
}

/// The snapshot endpoint: the caller's current share of the requested
/// types, as a typed map of wire resources.
async fn handle_resources(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ResourceQuery>,
) -> Response {
    let origin = match authorize(&state, &headers) {
        Ok(origin) => origin,
        Err(response) => return response,
    };
    metrics::count_request("resources");

    let mut out = serde_json::Map::new();
    for rtype in query.types() {
        let entries = state
            .resources
            .get(&origin, &rtype)
            .iter()
            .filter_map(|r| match r.encode() {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(%err, "cannot encode resource");
                    None
                }
            })
            .collect();
        out.insert(rtype, serde_json::Value::Array(entries));
    }
    axum::Json(serde_json::Value::Object(out)).into_response()
}

/// Unsubscribes when the response body is dropped, however the stream
/// ends: client disconnect, server shutdown, or eviction.
///
/// Holds only a weak sender: the registry owns the strong side, so an
/// evicted subscriber's channel actually closes and its stream ends
/// instead of idling forever.
struct StreamGuard {
    resources: Arc<BackendResources>,
    dist_name: String,
    sender: tokio::sync::mpsc::WeakSender<ResourceDiff>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.upgrade() {
            self.resources.unsubscribe(&self.dist_name, &sender);
        }
    }
}

/// The stream endpoint: a prime diff carrying everything currently
/// owned, then one frame per propagated change.
async fn handle_resource_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ResourceQuery>,
) -> Response {
    let origin = match authorize(&state, &headers) {
        Ok(origin) => origin,
        Err(response) => return response,
    };
    metrics::count_request("resource-stream");

    let request = ResourceRequest::new(origin.clone(), query.types());
    let (sender, receiver) =
        tokio::sync::mpsc::channel(EVENT_CHANNEL_CAPACITY);

    // the prime goes through the same channel, so it is on the wire
    // before any diff that races the subscription
    let prime = prime_diff(&state.resources, &request);
    let _ = sender.try_send(prime);

    let guard = StreamGuard {
        resources: state.resources.clone(),
        dist_name: origin,
        sender: sender.downgrade(),
    };
    state.resources.subscribe(request, sender);
    let mut shutdown = state.shutdown.clone();
    let stream = ReceiverStream::new(receiver)
        .map(move |diff| {
            let _ = &guard;
            frame(&diff)
        })
        .take_until(async move {
            let _ = shutdown.changed().await;
        });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .expect("building stream response")
}

/// The first stream message: a new-only diff of everything the caller
/// currently owns across its requested types.
fn prime_diff(
    resources: &BackendResources,
    request: &ResourceRequest,
) -> ResourceDiff {
    let mut diff = ResourceDiff::default();
    for rtype in &request.resource_types {
        let rs = resources.get(&request.request_origin, rtype);
        if !rs.is_empty() {
            diff.new.insert(rtype.clone(), rs);
        }
    }
    diff
}

fn frame(
    diff: &ResourceDiff,
) -> Result<bytes::Bytes, std::convert::Infallible> {
    let value = match diff.encode() {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(%err, "cannot encode diff frame");
            serde_json::json!({"new": {}, "changed": {}, "gone": {}})
        }
    };
    let mut line = value.to_string();
    line.push('\n');
    Ok(bytes::Bytes::from(line))
}
