//! Frame envelope and codec.
//!
//! Every inter-agent message, whether carried over a WebSocket or injected
//! through `/broadcast`, is a `Frame`: a typed JSON envelope with a dotted
//! type name, an arbitrary payload, optional metadata, and an optional
//! `requestId` correlating a unicast reply with its originating request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::blocker::TaskBlock;

/// Wire frame type names.
pub mod types {
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";

    pub const SYSTEM_WELCOME: &str = "system.welcome";
    pub const SYSTEM_STATE: &str = "system.state";
    pub const SYSTEM_HEARTBEAT: &str = "system.heartbeat";

    pub const AGENTS_REGISTER: &str = "agents.register";
    pub const AGENTS_REGISTERED: &str = "agents.registered";
    pub const AGENTS_REQUEST_STATS: &str = "agents.requestStats";
    pub const AGENTS_ACK_UNBLOCK: &str = "agents.ackUnblock";
    pub const AGENTS_UNBLOCK_ACK: &str = "agents.unblockAck";
    pub const AGENTS_PROMPT_UPDATE: &str = "agents.promptUpdate";
    pub const AGENTS_UNBLOCKED_REMINDER: &str = "agents.unblockedReminder";
    pub const AGENTS_ACTIVITY: &str = "agents.activity";

    pub const TASKS_FETCH_BY_AGENT: &str = "tasks.fetchByAgent";
    pub const TASKS_AGENT_SNAPSHOT: &str = "tasks.agentSnapshot";
    pub const TASKS_FETCH_BY_ID: &str = "tasks.fetchById";
    pub const TASKS_DETAIL: &str = "tasks.detail";
    pub const TASKS_SEARCH: &str = "tasks.search";
    pub const TASKS_SEARCH_RESULTS: &str = "tasks.searchResults";
    pub const TASKS_FETCH_OPEN: &str = "tasks.fetchOpen";
    pub const TASKS_OPEN: &str = "tasks.open";
    pub const TASKS_CREATE: &str = "tasks.create";
    pub const TASKS_CREATED: &str = "tasks.created";
    pub const TASKS_UPDATE_STATUS: &str = "tasks.updateStatus";
    pub const TASKS_STATUS_UPDATED: &str = "tasks.statusUpdated";
    pub const TASKS_BULK_UPDATE_STATUS: &str = "tasks.bulkUpdateStatus";
    pub const TASKS_BULK_REASSIGN: &str = "tasks.bulkReassign";
    pub const TASKS_REASSIGNED: &str = "tasks.reassigned";
    pub const TASKS_STATS: &str = "tasks.stats";
    pub const TASKS_ERROR: &str = "tasks.error";
    pub const TASKS_BLOCKED: &str = "tasks.blocked";
    pub const TASKS_UNBLOCKED: &str = "tasks.unblocked";
    pub const TASKS_BLOCKED_SUMMARY: &str = "tasks.blockedSummary";

    pub const DOCS_QUERY: &str = "docs.query";
    pub const DOCS_QUERY_RESULT: &str = "docs.queryResult";
    pub const DOCS_ERROR: &str = "docs.error";
}

/// Error code carried by `tasks.error` frames.
pub const TASKS_HANDLE_FAILED: &str = "TASKS_HANDLE_FAILED";

/// The typed JSON envelope exchanged between agents and the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(
        rename = "requestId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
}

impl Frame {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self { kind: kind.into(), payload, meta: None, request_id: None }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// The synthetic frame the codec substitutes for unparseable input.
    pub fn malformed() -> Self {
        Self::new(
            types::ERROR,
            serde_json::json!({ "message": "Malformed payload" }),
        )
    }

    /// Serialize to UTF-8 JSON.
    ///
    /// `Value`-based payloads cannot fail to serialize; a failure would mean
    /// a non-string map key, which `Value` cannot represent.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().into_bytes()
    }

    /// Decode a frame; malformed input yields [`Frame::malformed`] rather
    /// than an error.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_else(|_| Self::malformed())
    }

    /// `meta.notifyAgent`, when present.
    pub fn notify_agent(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|m| m.get("notifyAgent"))
            .and_then(Value::as_str)
    }

    /// `payload.blocker` parsed as a [`TaskBlock`], when present and valid.
    pub fn blocker(&self) -> Option<TaskBlock> {
        self.payload
            .get("blocker")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Reply frame for a failed inbound request.
    pub fn handler_error(message: impl Into<String>, request_id: Option<String>) -> Self {
        let message: String = message.into();
        Self::new(
            types::TASKS_ERROR,
            serde_json::json!({
                "code": TASKS_HANDLE_FAILED,
                "message": message,
            }),
        )
        .with_request_id(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_bytes_yield_synthetic_error_frame() {
        let frame = Frame::from_bytes(b"{not json");
        assert_eq!(frame.kind, types::ERROR);
        assert_eq!(frame.payload["message"], "Malformed payload");
    }

    #[test]
    fn serialize_deserialize_is_stable() {
        let frame = Frame::new("tasks.created", serde_json::json!({"task": {"id": 1}}))
            .with_meta(serde_json::json!({"notifyAgent": "A"}))
            .with_request_id(Some("req-1".into()));
        let first = frame.to_bytes();
        let decoded = Frame::from_bytes(&first);
        assert_eq!(decoded, frame);
        assert_eq!(decoded.to_bytes(), first);
    }

    #[test]
    fn meta_and_request_id_are_omitted_when_absent() {
        let json = Frame::new("pong", serde_json::json!({})).to_json();
        assert!(!json.contains("meta"));
        assert!(!json.contains("requestId"));
    }

    #[test]
    fn notify_agent_reads_meta() {
        let frame = Frame::new("tasks.unblocked", serde_json::json!({}))
            .with_meta(serde_json::json!({"notifyAgent": "scout"}));
        assert_eq!(frame.notify_agent(), Some("scout"));
        assert_eq!(Frame::new("x", Value::Null).notify_agent(), None);
    }
}
