//! Blocker domain model.
//!
//! A blocker records that an agent cannot proceed on a task until an
//! external condition is resolved. Among non-resolved rows the pair
//! `(task_id, blocked_agent)` is unique.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a blocker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for BlockSeverity {
    fn default() -> Self {
        Self::Medium
    }
}

impl BlockSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// A blocker row.
///
/// `acked` is meaningful only once `resolved_at` is set: it records that the
/// blocked agent has seen the resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBlock {
    pub id: Uuid,
    pub project_id: String,
    pub task_id: Uuid,
    pub blocked_agent: String,
    pub blocking_owner: Option<String>,
    pub reason: String,
    pub severity: BlockSeverity,
    pub requires_human_intervention: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
    pub acked: bool,
    pub last_notified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskBlock {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Input for blocking a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTaskInput {
    pub project_id: String,
    pub task_id: Uuid,
    pub blocked_agent: String,
    #[serde(default)]
    pub blocking_owner: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub severity: Option<BlockSeverity>,
    #[serde(default)]
    pub requires_human_intervention: Option<bool>,
}

/// Input for resolving a blocker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnblockTaskInput {
    pub task_id: Uuid,
    pub blocked_agent: String,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolution_note: Option<String>,
}
