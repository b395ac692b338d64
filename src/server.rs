//! HTTP listener for the stub engine.
//!
//! Endpoints:
//! - GET    /_stub/health        - Server status and request counters
//! - GET    /_stub/expectations  - List runtime expectations
//! - POST   /_stub/expectations  - Add one expectation
//! - PUT    /_stub/expectations  - Replace all expectations
//! - DELETE /_stub/expectations  - Clear expectations
//!
//! Every other request is answered by the engine.

use crate::config::ScenarioDefinition;
use crate::engine::StubEngine;
use crate::error::ServerError;
use crate::scenario::{parse_query_string, HttpRequest, HttpResponse};
use crate::value::Value;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Lifecycle of a [`StubServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
}

struct Running {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

/// A stub server that can be started and stopped repeatedly.
///
/// Dropping a running server also shuts it down.
pub struct StubServer {
    engine: Arc<StubEngine>,
    state: watch::Sender<ServerState>,
    running: Option<Running>,
}

impl StubServer {
    pub fn new(engine: StubEngine) -> Self {
        Self::with_engine(Arc::new(engine))
    }

    pub fn with_engine(engine: Arc<StubEngine>) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        Self {
            engine,
            state,
            running: None,
        }
    }

    pub fn engine(&self) -> &Arc<StubEngine> {
        &self.engine
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// The bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Base URL while listening, e.g. `http://127.0.0.1:54321`.
    pub fn url(&self) -> Option<String> {
        self.local_addr().map(|addr| format!("http://{addr}"))
    }

    /// Bind and start serving in a background task. Port 0 picks a free
    /// port; the bound address is returned.
    pub async fn start(&mut self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        self.transition(ServerState::Starting);

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.transition(ServerState::Stopped);
                return Err(ServerError::Bind(e));
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.transition(ServerState::Stopped);
                return Err(ServerError::Bind(e));
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(self.engine.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    // A dropped sender also means shut down
                    let _ = shutdown_rx.await;
                })
                .await
        });

        self.running = Some(Running {
            addr,
            shutdown_tx,
            handle,
        });
        self.transition(ServerState::Listening);
        info!(address = %addr, "Stub server listening");
        Ok(addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        let running = self.running.take().ok_or(ServerError::NotRunning)?;
        let _ = running.shutdown_tx.send(());

        let result = match running.handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ServerError::Task(e.to_string())),
            Err(e) => Err(ServerError::Task(e.to_string())),
        };
        self.transition(ServerState::Stopped);
        info!(address = %running.addr, "Stub server stopped");
        result
    }

    /// Serve until Ctrl+C, then shut down gracefully.
    pub async fn run_until_signal(mut self, addr: SocketAddr) -> Result<(), ServerError> {
        self.start(addr).await?;
        shutdown_signal().await;
        self.stop().await
    }

    fn transition(&self, next: ServerState) {
        self.state.send_replace(next);
    }
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    info!("Received shutdown signal");
}

/// Build the router: administrative endpoints plus the stub fallback.
pub fn router(engine: Arc<StubEngine>) -> Router {
    Router::new()
        .route("/_stub/health", get(handle_health))
        .route(
            "/_stub/expectations",
            get(handle_list_expectations)
                .post(handle_add_expectation)
                .put(handle_replace_expectations)
                .delete(handle_clear_expectations),
        )
        .fallback(handle_stub_request)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

/// GET /_stub/health
async fn handle_health(State(engine): State<Arc<StubEngine>>) -> impl IntoResponse {
    let snapshot = engine.snapshot().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "snapshot_version": snapshot.version,
        "scenarios": snapshot.scenarios.len(),
        "expectations": snapshot.expectation_count,
        "requests": {
            "total": engine.total_requests(),
            "matched": engine.total_matched(),
            "unmatched": engine.total_unmatched(),
        },
    }))
}

/// GET /_stub/expectations
async fn handle_list_expectations(State(engine): State<Arc<StubEngine>>) -> impl IntoResponse {
    let snapshot = engine.snapshot().await;
    let expectations: Vec<_> = snapshot
        .expectations()
        .iter()
        .map(crate::engine::ScenarioSummary::from)
        .collect();
    Json(serde_json::json!({
        "version": snapshot.version,
        "expectations": expectations,
    }))
}

/// POST /_stub/expectations
async fn handle_add_expectation(State(engine): State<Arc<StubEngine>>, body: Bytes) -> Response {
    let definition: ScenarioDefinition = match serde_json::from_slice(&body) {
        Ok(definition) => definition,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &format!("invalid expectation: {e}")),
    };

    match engine.add_expectation(&definition).await {
        Ok(version) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"name": definition.name, "version": version})),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Rejected expectation");
            json_error(StatusCode::BAD_REQUEST, &format!("invalid expectation: {e}"))
        }
    }
}

/// PUT /_stub/expectations
async fn handle_replace_expectations(
    State(engine): State<Arc<StubEngine>>,
    body: Bytes,
) -> Response {
    let definitions: Vec<ScenarioDefinition> = match serde_json::from_slice(&body) {
        Ok(definitions) => definitions,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid expectations: {e}"))
        }
    };

    match engine.replace_expectations(&definitions).await {
        Ok(version) => Json(serde_json::json!({
            "expectations": definitions.len(),
            "version": version,
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Rejected expectations");
            json_error(StatusCode::BAD_REQUEST, &format!("invalid expectations: {e}"))
        }
    }
}

/// DELETE /_stub/expectations
async fn handle_clear_expectations(State(engine): State<Arc<StubEngine>>) -> impl IntoResponse {
    let removed = engine.clear_expectations().await;
    Json(serde_json::json!({"removed": removed}))
}

/// Every non-administrative request.
async fn handle_stub_request(
    State(engine): State<Arc<StubEngine>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut request = HttpRequest::new(method.as_str(), uri.path());
    if let Some(query) = uri.query() {
        request.query = parse_query_string(query);
    }
    request.headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    match Value::parse_body(&String::from_utf8_lossy(&body), content_type) {
        Ok(value) => request.body = value,
        Err(e) => return into_response(engine.reject_malformed(&request, &e)),
    }

    into_response(engine.dispatch(&request).await)
}

fn into_response(response: HttpResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid response header"),
        }
    }
    (status, headers, Body::from(response.body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalSettings;

    fn local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let mut server = StubServer::new(StubEngine::new(Vec::new(), GlobalSettings::default()));
        let mut states = server.subscribe();
        assert_eq!(server.state(), ServerState::Stopped);

        let addr = server.start(local()).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.url(), Some(format!("http://{addr}")));
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ServerState::Listening);

        assert!(matches!(
            server.start(local()).await,
            Err(ServerError::AlreadyRunning)
        ));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let mut server = StubServer::new(StubEngine::new(Vec::new(), GlobalSettings::default()));
        server.start(local()).await.unwrap();
        server.stop().await.unwrap();
        server.start(local()).await.unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        server.stop().await.unwrap();
    }

    #[test]
    fn test_invalid_response_headers_are_skipped() {
        let response = into_response(HttpResponse {
            status: 200,
            headers: vec![
                ("X-Ok".to_string(), "yes".to_string()),
                ("Bad Header".to_string(), "x".to_string()),
            ],
            body: b"hi".to_vec(),
        });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-ok").unwrap(), "yes");
        assert_eq!(response.headers().len(), 1);
    }
}
