//! Axum router: status, broadcast trigger, health, metrics, and `/ws`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use fanout_store::SharedStore;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::errors::{ApiError, ServerError};
use crate::health::{self, HealthResponse};
use crate::manager::ConnectionManager;
use crate::metrics::BROADCAST_PUBLISH_TOTAL;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// This worker's connection manager.
    pub manager: Arc<ConnectionManager>,
    /// Shared store used for publishing and health probes.
    pub store: Arc<dyn SharedStore>,
    /// Channel `POST /broadcast` publishes on.
    pub broadcast_channel: Arc<str>,
    /// When the worker started.
    pub start_time: Instant,
    /// Prometheus handle rendered by `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Attach a Prometheus handle so `/metrics` is served.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// `GET /` body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Always `"ok"`.
    pub status: &'static str,
    /// Connections held by this worker.
    pub local_active_connections: usize,
    /// Connections across the cluster.
    pub global_active_connections: usize,
}

/// `POST /broadcast` request body.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Text delivered verbatim to every connected client.
    pub message: String,
}

/// `POST /broadcast` response body.
#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    /// Always `true` when the publish succeeded.
    pub published: bool,
    /// Connections across the cluster after publishing.
    pub global_active_connections: usize,
}

/// Build the Axum router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind a TCP listener on `host:port`.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serve `router` until `stop_accepting` fires.
///
/// Only stops accepting new requests; upgraded WebSocket sessions are not
/// tracked here and keep running.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    stop_accepting: CancellationToken,
) -> Result<(), ServerError> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(stop_accepting.cancelled_owned())
        .await?;
    info!(%addr, "stopped accepting connections");
    Ok(())
}

/// GET /
async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let global = state.manager.global_active_count().await?;
    Ok(Json(StatusResponse {
        status: "ok",
        local_active_connections: state.manager.local_active_count(),
        global_active_connections: global,
    }))
}

/// POST /broadcast
async fn broadcast_handler(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let receivers = state
        .store
        .publish(&state.broadcast_channel, &request.message)
        .await?;
    counter!(BROADCAST_PUBLISH_TOTAL).increment(1);
    info!(receivers, bytes = request.message.len(), "broadcast published");

    let global = state.manager.global_active_count().await?;
    Ok(Json(BroadcastResponse {
        published: true,
        global_active_connections: global,
    }))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "store health check failed");
            false
        }
    };
    let global = state.manager.global_active_count().await.ok();
    Json(health::health_check(
        state.start_time,
        store_ok,
        state.manager.local_active_count(),
        global,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_ws_session(socket, state.manager))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use fanout_settings::FanoutSettings;
    use fanout_store::MemoryStore;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use super::*;
    use crate::lifecycle::Lifespan;

    async fn make_state() -> (Arc<MemoryStore>, AppState) {
        let store = Arc::new(MemoryStore::new());
        let lifespan = Lifespan::start_with_store(store.clone(), &FanoutSettings::default(), "1")
            .await
            .unwrap();
        (store, lifespan.app_state())
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn broadcast_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/broadcast")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_reports_counts() {
        let (_store, state) = make_state().await;
        let _held = state.manager.connect().await.unwrap();

        let resp = router(state).oneshot(get_request("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["local_active_connections"], 1);
        assert_eq!(parsed["global_active_connections"], 1);
    }

    #[tokio::test]
    async fn status_is_503_when_store_is_down() {
        let (store, state) = make_state().await;
        store.set_available(false);

        let resp = router(state).oneshot(get_request("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn broadcast_publishes_verbatim() {
        let (store, state) = make_state().await;
        let mut observer = store.subscribe(&state.broadcast_channel).await.unwrap();

        let resp = router(state)
            .oneshot(broadcast_request(r#"{"message": "maintenance at 5pm"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["published"], true);
        assert_eq!(parsed["global_active_connections"], 0);

        assert_eq!(
            observer.next_message().await.unwrap().as_deref(),
            Some("maintenance at 5pm")
        );
    }

    #[tokio::test]
    async fn broadcast_rejects_missing_message() {
        let (_store, state) = make_state().await;
        let resp = router(state)
            .oneshot(broadcast_request(r#"{"text": "wrong field"}"#))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn broadcast_is_503_when_store_is_down() {
        let (store, state) = make_state().await;
        store.set_available(false);
        let resp = router(state)
            .oneshot(broadcast_request(r#"{"message": "x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_ok() {
        let (_store, state) = make_state().await;
        let resp = router(state).oneshot(get_request("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["store"]["ok"], true);
        assert_eq!(parsed["websocket"]["global_active_connections"], 0);
    }

    #[tokio::test]
    async fn health_degraded_not_down() {
        let (store, state) = make_state().await;
        store.set_available(false);
        let resp = router(state).oneshot(get_request("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "degraded");
        assert_eq!(parsed["store"]["ok"], false);
        assert!(parsed["websocket"]["global_active_connections"].is_null());
    }

    #[tokio::test]
    async fn metrics_404_without_handle() {
        let (_store, state) = make_state().await;
        let resp = router(state).oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_rendered_with_handle() {
        let (_store, state) = make_state().await;
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let resp = router(state.with_metrics(handle))
            .oneshot(get_request("/metrics"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn ws_requires_upgrade() {
        let (_store, state) = make_state().await;
        let resp = router(state).oneshot(get_request("/ws")).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (_store, state) = make_state().await;
        let resp = router(state).oneshot(get_request("/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
