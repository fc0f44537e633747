//! Task store port.
//!
//! The durable, cross-room persistence contract. Every operation is a
//! single transaction; bulk operations are atomic with respect to other
//! callers.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::StoreResult;
use crate::domain::models::{
    AgentActivity, AgentCheckIn, BlockTaskInput, CreateTaskInput, StatusUpdate, Task, TaskBlock,
    TaskCounts, TaskStatus, UnblockTaskInput,
};

/// Filter criteria for listing tasks. An empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub project_id: Option<String>,
    pub epic_id: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub agent: Option<String>,
    pub status: Option<TaskStatus>,
    /// Case-preserving substring match against title, description, and
    /// assigned agent.
    pub search: Option<String>,
    /// Explicit id set; `Some(vec![])` matches nothing.
    pub task_ids: Option<Vec<Uuid>>,
}

impl TaskFilter {
    pub fn for_agent(agent: impl Into<String>) -> Self {
        Self { agent: Some(agent.into()), ..Default::default() }
    }

    pub fn for_search(search: impl Into<String>) -> Self {
        Self { search: Some(search.into()), ..Default::default() }
    }
}

/// Repository interface for tasks, blockers, and agent activity.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// List tasks matching `filter`, ordered by `updated_at` descending.
    async fn list_tasks(&self, filter: TaskFilter) -> StoreResult<Vec<Task>>;

    /// Get a task by id.
    async fn get_task_by_id(&self, id: Uuid) -> StoreResult<Option<Task>>;

    /// All tasks whose status is not `done`, ordered by priority descending
    /// then `updated_at` descending.
    async fn list_open_tasks(&self) -> StoreResult<Vec<Task>>;

    /// Create a task with a fresh id and store defaults.
    async fn create_task(&self, input: CreateTaskInput) -> StoreResult<Task>;

    /// Atomically reassign every listed task. Missing ids are skipped.
    async fn bulk_reassign_tasks(&self, ids: &[Uuid], agent: &str) -> StoreResult<Vec<Task>>;

    /// Atomically apply status updates. Returns the deduplicated resulting
    /// rows.
    async fn bulk_update_task_statuses(&self, updates: &[StatusUpdate]) -> StoreResult<Vec<Task>>;

    /// Per-status counts and the total.
    async fn task_counts(&self) -> StoreResult<TaskCounts>;

    /// All agent activity rows, ordered by `updated_at` descending.
    async fn list_agent_activity(&self) -> StoreResult<Vec<AgentActivity>>;

    /// Upsert keyed on agent name; `last_check_in` and `updated_at` are
    /// stamped on every call.
    async fn upsert_agent_activity(&self, input: AgentCheckIn) -> StoreResult<AgentActivity>;

    /// Insert a blocker, or update the open row for the same
    /// `(task_id, blocked_agent)` in place (new reason/owner, `acked`
    /// reset). The owning task's status moves to `blocked` in the same
    /// transaction.
    async fn insert_task_block(&self, input: BlockTaskInput) -> StoreResult<TaskBlock>;

    /// Resolve the open blocker for `(task_id, blocked_agent)`. Resolving an
    /// already-resolved key returns the existing resolved row unchanged.
    async fn resolve_task_block(&self, input: UnblockTaskInput) -> StoreResult<Option<TaskBlock>>;

    /// Mark the most recent blocker row for `(task_id, agent)` as
    /// acknowledged.
    async fn ack_task_block(&self, task_id: Uuid, agent: &str) -> StoreResult<Option<TaskBlock>>;

    /// Blockers ordered by `updated_at` descending; acknowledged rows are
    /// filtered out unless `include_acked`.
    async fn list_blocked_tasks(&self, include_acked: bool) -> StoreResult<Vec<TaskBlock>>;

    /// Stamp `last_notified` on a blocker row.
    async fn touch_block_last_notified(&self, block_id: Uuid) -> StoreResult<()>;
}
