//! Agent activity model.
//!
//! One row per agent name, upserted on explicit check-in and implicitly by
//! the block/unblock flows. Never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an agent reports itself as doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Offline,
    Available,
    Busy,
    InProgress,
    Blocked,
    AwaitingHuman,
    Done,
    Error,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Available
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Available => "available",
            Self::Busy => "busy",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::AwaitingHuman => "awaiting_human",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "offline" => Some(Self::Offline),
            "available" => Some(Self::Available),
            "busy" => Some(Self::Busy),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "awaiting_human" => Some(Self::AwaitingHuman),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Stored activity row for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentActivity {
    pub agent_name: String,
    pub status: AgentStatus,
    pub task_id: Option<Uuid>,
    pub note: Option<String>,
    pub last_check_in: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert input for an agent check-in. `last_check_in` and `updated_at`
/// are stamped by the store on every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCheckIn {
    pub agent_name: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub note: Option<String>,
}
