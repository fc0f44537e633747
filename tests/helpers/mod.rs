//! Shared test harness: a full taskroom server on an ephemeral port plus a
//! small WebSocket client.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use taskroom::domain::models::{Config, Frame, RoomConfig};
use taskroom::domain::ports::{NullDocsTool, TaskStore};
use taskroom::infrastructure::database::{
    DatabaseConnection, RetryPolicy, SqliteRoomStateStore, SqliteTaskStore,
};
use taskroom::room::{RoomDeps, RoomRegistry};
use taskroom::server::HttpServer;
use taskroom::services::TaskService;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<dyn TaskStore>,
    pub room_store: Arc<SqliteRoomStateStore>,
    pub service: Arc<TaskService>,
    _dir: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Boot a server against a temp-file database, with the task service's
/// `/broadcast` base pointed back at the bound address.
pub async fn start_server(room_config: RoomConfig) -> TestServer {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = dir.path().join("taskroom.db");
    let db = DatabaseConnection::new(&format!("sqlite:{}", db_path.display()), 5)
        .await
        .expect("failed to open database");
    db.migrate().await.expect("failed to migrate");

    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(db.pool().clone()));
    let room_store = Arc::new(SqliteRoomStateStore::new(db.pool().clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind");
    let addr = listener.local_addr().expect("no local addr");

    let config = Config::default();
    let service = Arc::new(
        TaskService::new(store.clone(), &config).with_broadcast_base(format!("http://{addr}")),
    );

    let registry = Arc::new(RoomRegistry::new(RoomDeps {
        store: store.clone(),
        room_store: room_store.clone(),
        docs: Arc::new(NullDocsTool),
        service: service.clone(),
        config: room_config,
        retry: RetryPolicy::default(),
    }));

    let server = HttpServer::new(registry, None, true);
    tokio::spawn(async move {
        server.serve(listener).await.expect("server crashed");
    });

    TestServer { addr, store, room_store, service, _dir: dir }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr, room: &str) -> Self {
        let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?room={room}"))
            .await
            .expect("websocket connect failed");
        Self { stream }
    }

    pub async fn send_frame(&mut self, frame: &Frame) {
        self.stream
            .send(Message::Text(frame.to_json().into()))
            .await
            .expect("websocket send failed");
    }

    /// Next text frame, within a deadline.
    pub async fn next_frame(&mut self) -> Frame {
        loop {
            let message = timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for frame")
                .expect("websocket closed")
                .expect("websocket error");
            if let Message::Text(text) = message {
                return Frame::from_bytes(text.as_bytes());
            }
        }
    }

    /// Skip frames until one of the wanted kind arrives.
    pub async fn next_frame_of(&mut self, kind: &str) -> Frame {
        for _ in 0..100 {
            let frame = self.next_frame().await;
            if frame.kind == kind {
                return frame;
            }
        }
        panic!("frame {kind} never arrived");
    }

    /// Collect every already-buffered text frame without waiting.
    pub async fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(Some(Ok(message))) =
            timeout(Duration::from_millis(50), self.stream.next()).await
        {
            if let Message::Text(text) = message {
                frames.push(Frame::from_bytes(text.as_bytes()));
            }
        }
        frames
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
