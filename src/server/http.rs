//! HTTP ingress: WebSocket upgrades and the `/broadcast` injection path.
//!
//! `GET /ws?room={id}` upgrades and hands the socket to the room's actor;
//! `POST /rooms/{id}/broadcast` parses the body as a frame and injects it.
//! A socket's reader forwards raw payloads into the actor mailbox and its
//! writer drains the connection's outbound channel; the writer ends when
//! the actor drops the connection handle.

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::Frame;
use crate::room::{ConnectionHandle, RoomCommand, RoomRegistry};
use crate::services::signing::{verify_signature, SIGNATURE_HEADER};

/// Shared state for the ingress router.
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub broadcast_secret: Option<String>,
}

/// The taskroom HTTP server.
pub struct HttpServer {
    state: Arc<AppState>,
    enable_cors: bool,
}

impl HttpServer {
    pub fn new(registry: Arc<RoomRegistry>, broadcast_secret: Option<String>, enable_cors: bool) -> Self {
        Self {
            state: Arc::new(AppState { registry, broadcast_secret }),
            enable_cors,
        }
    }

    /// Build the router with all endpoints.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/ws", get(ws_upgrade))
            .route("/rooms/{room_id}/broadcast", post(broadcast_frame))
            .route("/health", get(health_check))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(%addr, "taskroom server listening");
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Serve on an already-bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = listener.local_addr()?;
        info!(%addr, "taskroom server listening");
        axum::serve(listener, self.build_router()).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WsParams {
    room: Option<String>,
}

/// WebSocket upgrade for `GET /ws?room={id}`. Plain GETs without upgrade
/// headers get 426.
async fn ws_upgrade(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(room_id) = params.room.filter(|r| !r.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing room query parameter" })),
        )
            .into_response();
    };

    match ws {
        Ok(upgrade) => {
            let registry = state.registry.clone();
            upgrade
                .on_upgrade(move |socket| handle_socket(socket, room_id, registry))
                .into_response()
        }
        Err(rejection) => {
            debug!(error = %rejection, "non-upgrade request on /ws");
            (
                StatusCode::UPGRADE_REQUIRED,
                Json(json!({ "error": "WebSocket upgrade required" })),
            )
                .into_response()
        }
    }
}

/// Pump one WebSocket for its lifetime.
async fn handle_socket(socket: WebSocket, room_id: String, registry: Arc<RoomRegistry>) {
    let room = registry.handle(&room_id).await;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let conn = ConnectionHandle::new(Uuid::new_v4(), out_tx);
    let conn_id = conn.id;
    room.send(RoomCommand::Attach { handle: conn });

    let (mut sink, mut stream) = socket.split();

    // Writer: drains the connection's outbound channel. Exits once the
    // actor drops the sender (detach) or the socket refuses a write.
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let mut error = false;
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => room.send(RoomCommand::Inbound {
                conn_id,
                data: text.as_bytes().to_vec(),
            }),
            Ok(Message::Binary(bytes)) => room.send(RoomCommand::Inbound {
                conn_id,
                data: bytes.to_vec(),
            }),
            Ok(Message::Close(_)) => break,
            // Protocol-level ping/pong is answered by the WS layer.
            Ok(_) => {}
            Err(err) => {
                warn!(%conn_id, %room_id, error = %err, "websocket read error");
                error = true;
                break;
            }
        }
    }

    room.send(RoomCommand::Detach { conn_id, error });
    let _ = writer.await;
    debug!(%conn_id, %room_id, "websocket closed");
}

/// `POST /rooms/{id}/broadcast`: inject a server-originated frame.
async fn broadcast_frame(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.broadcast_secret {
        let presented = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, presented) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "invalid signature" })),
            )
                .into_response();
        }
    }

    match serde_json::from_slice::<Frame>(&body) {
        Ok(frame) => {
            let room = state.registry.handle(&room_id).await;
            room.send(RoomCommand::Inject { frame });
            Json(json!({ "success": true })).into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": err.to_string() })),
        )
            .into_response(),
    }
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "taskroom",
        "rooms": state.registry.room_count().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Config, RoomConfig};
    use crate::domain::ports::{NullDocsTool, NullRoomStateStore, TaskStore};
    use crate::infrastructure::database::{DatabaseConnection, RetryPolicy, SqliteTaskStore};
    use crate::room::RoomDeps;
    use crate::services::signing::compute_signature;
    use crate::services::TaskService;

    async fn spawn_server(secret: Option<String>) -> std::net::SocketAddr {
        let db = DatabaseConnection::new("sqlite::memory:", 5).await.unwrap();
        db.migrate().await.unwrap();
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(db.pool().clone()));
        let service = Arc::new(TaskService::new(store.clone(), &Config::default()));
        let registry = Arc::new(RoomRegistry::new(RoomDeps {
            store,
            room_store: Arc::new(NullRoomStateStore),
            docs: Arc::new(NullDocsTool),
            service,
            config: RoomConfig::default(),
            retry: RetryPolicy::default(),
        }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = HttpServer::new(registry, secret, true);
        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn health_reports_service() {
        let addr = spawn_server(None).await;
        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "taskroom");
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_426() {
        let addr = spawn_server(None).await;
        let response = reqwest::get(format!("http://{addr}/ws?room=r1")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn ws_without_room_is_400() {
        let addr = spawn_server(None).await;
        let response = reqwest::get(format!("http://{addr}/ws")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn broadcast_accepts_frame_and_rejects_garbage() {
        let addr = spawn_server(None).await;
        let client = reqwest::Client::new();

        let ok = client
            .post(format!("http://{addr}/rooms/r1/broadcast"))
            .header("Content-Type", "application/json")
            .body(r#"{"type":"tasks.blockedSummary","payload":{}}"#)
            .send()
            .await
            .unwrap();
        assert!(ok.status().is_success());
        let body: serde_json::Value = ok.json().await.unwrap();
        assert_eq!(body["success"], true);

        let bad = client
            .post(format!("http://{addr}/rooms/r1/broadcast"))
            .header("Content-Type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = bad.json().await.unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn signed_broadcast_requires_valid_signature() {
        let addr = spawn_server(Some("s3cret".into())).await;
        let client = reqwest::Client::new();
        let body = r#"{"type":"agents.activity","payload":{}}"#;

        let unsigned = client
            .post(format!("http://{addr}/rooms/r1/broadcast"))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(unsigned.status(), reqwest::StatusCode::UNAUTHORIZED);

        let signed = client
            .post(format!("http://{addr}/rooms/r1/broadcast"))
            .header(SIGNATURE_HEADER, compute_signature("s3cret", body.as_bytes()))
            .body(body)
            .send()
            .await
            .unwrap();
        assert!(signed.status().is_success());
    }
}
