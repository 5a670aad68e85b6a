//! `NichikaServer`: Axum HTTP + WebSocket front end for the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use nichika_hub::HubHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::health::{self, HealthResponse};
use crate::metrics::{WS_CONNECTIONS_REJECTED_TOTAL, render};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ConnectionSlots;
use crate::websocket::session::{SessionTiming, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Producer side of the hub.
    pub hub: HubHandle,
    /// Concurrent connection limit.
    pub slots: Arc<ConnectionSlots>,
    /// Listener configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The HTTP / WebSocket server.
pub struct NichikaServer {
    config: Arc<ServerConfig>,
    hub: HubHandle,
    slots: Arc<ConnectionSlots>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl NichikaServer {
    /// Create a server that feeds `hub`.
    pub fn new(config: ServerConfig, hub: HubHandle, metrics: PrometheusHandle) -> Self {
        Self {
            slots: ConnectionSlots::new(config.max_connections),
            config: Arc::new(config),
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    ///
    /// `/ws` reads the peer address from `ConnectInfo`, so the router must
    /// be served with `into_make_service_with_connect_info::<SocketAddr>()`.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            slots: Arc::clone(&self.slots),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route(
                "/broadcast",
                post(broadcast_handler).layer(DefaultBodyLimit::max(self.config.max_message_size)),
            )
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        info!(%addr, "nichika server listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
            if let Err(e) = result {
                error!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the hub handle.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// WebSocket connections currently open.
    pub fn connection_count(&self) -> usize {
        self.slots.active()
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(origin): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() || state.hub.is_closed() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(slot) = state.slots.try_acquire() else {
        warn!(%origin, max = state.slots.max(), "connection limit reached, refusing upgrade");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let timing = SessionTiming {
        ping_interval: state.config.heartbeat_interval(),
        pong_timeout: state.config.heartbeat_timeout(),
    };
    let shutdown = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .max_frame_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, origin, state.hub, timing, shutdown, slot)
        })
}

/// POST /broadcast
async fn broadcast_handler(State(state): State<AppState>, body: Bytes) -> StatusCode {
    match state.hub.broadcast(body).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            warn!(error = %e, "broadcast refused");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.stats().await.ok().map(|s| s.members);
    Json(health::health_check(
        state.start_time,
        connections,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render(&state.metrics),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::metrics::detached_handle;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use nichika_hub::{Hub, HubConfig, HubStats};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn make_server() -> (NichikaServer, JoinHandle<HubStats>, CancellationToken) {
        let token = CancellationToken::new();
        let (hub, handle) = Hub::new(&HubConfig::default());
        let join = hub.with_shutdown(token.clone()).spawn();
        let server = NichikaServer::new(ServerConfig::default(), handle, detached_handle());
        (server, join, token)
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post(uri: &str, body: &'static [u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    async fn wait_for_members(hub: &HubHandle, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.stats().await.unwrap().members != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn accessors() {
        let (server, _join, _token) = make_server();
        assert_eq!(server.config().port, 0);
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.connection_count(), 0);
        assert!(!server.hub().is_closed());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (server, _join, _token) = make_server();
        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_counts_hub_members() {
        let (server, _join, _token) = make_server();
        let _outbox = server.hub().connect("127.0.0.1:1").await.unwrap();
        wait_for_members(server.hub(), 1).await;

        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["connections"], 1);
    }

    #[tokio::test]
    async fn health_degraded_after_hub_stops() {
        let (server, join, token) = make_server();
        token.cancel();
        let _ = join.await.unwrap();

        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["status"], "degraded");
    }

    #[tokio::test]
    async fn health_reports_shutting_down() {
        let (server, _join, _token) = make_server();
        server.shutdown().shutdown();

        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["status"], "shutting_down");
    }

    #[tokio::test]
    async fn broadcast_endpoint_delivers_to_members() {
        let (server, _join, _token) = make_server();
        let mut outbox = server.hub().connect("127.0.0.1:1").await.unwrap();
        wait_for_members(server.hub(), 1).await;

        let resp = server
            .router()
            .oneshot(post("/broadcast", b"system event"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(outbox.recv().await.unwrap(), Bytes::from_static(b"system event"));
    }

    #[tokio::test]
    async fn broadcast_endpoint_503_when_hub_stopped() {
        let (server, join, token) = make_server();
        token.cancel();
        let _ = join.await.unwrap();

        let resp = server
            .router()
            .oneshot(post("/broadcast", b"late"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn broadcast_body_over_limit_rejected() {
        let token = CancellationToken::new();
        let (hub, handle) = Hub::new(&HubConfig::default());
        let _join = hub.with_shutdown(token.clone()).spawn();
        let config = ServerConfig {
            max_message_size: 4,
            ..ServerConfig::default()
        };
        let server = NichikaServer::new(config, handle, detached_handle());

        let resp = server
            .router()
            .oneshot(post("/broadcast", b"too long"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn metrics_endpoint_is_text() {
        let (server, _join, _token) = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let (server, _join, _token) = make_server();
        let app = server
            .router()
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (server, _join, _token) = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
