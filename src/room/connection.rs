//! Live WebSocket connections as seen by a room actor.
//!
//! A `ConnectionHandle` is owned by its room actor for the connection's
//! entire lifetime. Outbound frames go through an unbounded channel drained
//! by the socket writer task; a broken socket surfaces on the next send and
//! is cleaned up by the following lifecycle event.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::domain::models::Frame;

/// WS close code for internal errors.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub type ConnectionId = Uuid;

/// One live WebSocket connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Set once the agent sends `agents.register`.
    pub agent_name: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Message>) -> Self {
        let now = Utc::now();
        Self { id, agent_name: None, connected_at: now, last_seen: now, outbound }
    }

    /// Send a pre-serialized message. Returns false when the writer is gone.
    pub fn send_message(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }

    /// Serialize and send one frame.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        let sent = self.send_message(Message::Text(Utf8Bytes::from(frame.to_json())));
        if !sent {
            warn!(conn_id = %self.id, kind = %frame.kind, "dropping frame for dead connection");
        }
        sent
    }

    /// Ask the writer to close the socket with a code.
    pub fn send_close(&self, code: u16) {
        let _ = self.send_message(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static("internal error"),
        })));
    }

    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            agent_name: self.agent_name.clone(),
            connected_at: self.connected_at,
            last_seen: self.last_seen,
        }
    }
}

/// Connection metadata carried in `system.state` broadcasts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub agent_name: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Fan a frame out to a set of connections: serialize once, skip and log on
/// per-connection failure.
pub fn broadcast<'a>(conns: impl Iterator<Item = &'a ConnectionHandle>, frame: &Frame) {
    let message = Message::Text(Utf8Bytes::from(frame.to_json()));
    for conn in conns {
        if !conn.send_message(message.clone()) {
            warn!(conn_id = %conn.id, kind = %frame.kind, "broadcast delivery failed, skipping peer");
        }
    }
}
