//! Task service implementing the write-through mutation path.
//!
//! Every task and blocker mutation, regardless of transport, goes through
//! this service: execute the store operation, then inject the resulting
//! frame into the owning room over the HTTP `/broadcast` path so the room's
//! server-frame processing runs uniformly. Injection failure is logged and
//! never fails the caller; the next periodic blocked summary resynchronizes.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::frame::types;
use crate::domain::models::{
    AgentActivity, AgentCheckIn, AgentStatus, BlockTaskInput, Config, CreateTaskInput, Frame,
    StatusUpdate, Task, TaskBlock, TaskStatus, UnblockTaskInput,
};
use crate::domain::ports::TaskStore;
use crate::infrastructure::database::RetryPolicy;
use crate::services::signing::{compute_signature, SIGNATURE_HEADER};

/// Stateless orchestrator for task and blocker mutations.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    retry: RetryPolicy,
    client: reqwest::Client,
    broadcast_base: String,
    broadcast_secret: Option<String>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            store,
            retry: RetryPolicy::from_config(config.store_retry),
            client,
            broadcast_base: config.server.broadcast_base(),
            broadcast_secret: config.server.broadcast_secret.clone(),
        }
    }

    /// Override the `/broadcast` base URL (servers bound to ephemeral ports).
    pub fn with_broadcast_base(mut self, base: impl Into<String>) -> Self {
        self.broadcast_base = base.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Inject a server-originated frame into a room. Best-effort: failures
    /// are logged and swallowed.
    async fn emit(&self, room_id: &str, frame: &Frame) {
        let url = format!("{}/rooms/{}/broadcast", self.broadcast_base, room_id);
        let body = frame.to_bytes();

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.broadcast_secret {
            request = request.header(SIGNATURE_HEADER, compute_signature(secret, &body));
        }

        match request.body(body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(room_id, kind = %frame.kind, "frame injected");
            }
            Ok(response) => {
                warn!(room_id, kind = %frame.kind, status = %response.status(), "broadcast rejected");
            }
            Err(err) => {
                warn!(room_id, kind = %frame.kind, error = %err, "broadcast injection failed");
            }
        }
    }

    /// Current unacked-blocker summary as a frame.
    async fn blocked_summary_frame(&self) -> DomainResult<Frame> {
        let store = self.store.clone();
        let blockers = self
            .retry
            .execute(|| {
                let store = store.clone();
                async move { store.list_blocked_tasks(false).await }
            })
            .await?;
        Ok(Frame::new(
            types::TASKS_BLOCKED_SUMMARY,
            json!({
                "blockers": blockers,
                "count": blockers.len(),
                "ts": Utc::now(),
            }),
        ))
    }

    async fn emit_blocked_summary(&self, room_id: &str) {
        match self.blocked_summary_frame().await {
            Ok(frame) => self.emit(room_id, &frame).await,
            Err(err) => warn!(room_id, error = %err, "failed to build blocked summary"),
        }
    }

    /// Create a task and reflect it into its room.
    pub async fn create(&self, input: CreateTaskInput) -> DomainResult<Task> {
        let task = self.store.create_task(input).await?;
        let frame = Frame::new(types::TASKS_CREATED, json!({ "task": task }));
        self.emit(&task.project_id, &frame).await;
        Ok(task)
    }

    /// Update one task's status and reflect it into its room.
    pub async fn update_single_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
    ) -> DomainResult<Task> {
        let rows = self
            .store
            .bulk_update_task_statuses(&[StatusUpdate { task_id, status }])
            .await?;
        let task = rows.into_iter().next().ok_or(DomainError::TaskNotFound(task_id))?;
        let frame = Frame::new(types::TASKS_STATUS_UPDATED, json!({ "task": task }));
        self.emit(&task.project_id, &frame).await;
        Ok(task)
    }

    /// Apply a batch of status updates, reflecting per affected room.
    pub async fn update_statuses(&self, updates: &[StatusUpdate]) -> DomainResult<Vec<Task>> {
        let tasks = self.store.bulk_update_task_statuses(updates).await?;
        for (room_id, group) in group_by_room(&tasks) {
            let frame = Frame::new(types::TASKS_STATUS_UPDATED, json!({ "tasks": group }));
            self.emit(&room_id, &frame).await;
        }
        Ok(tasks)
    }

    /// Reassign a batch of tasks, reflecting per affected room.
    pub async fn reassign(&self, task_ids: &[Uuid], agent: &str) -> DomainResult<Vec<Task>> {
        let tasks = self.store.bulk_reassign_tasks(task_ids, agent).await?;
        for (room_id, group) in group_by_room(&tasks) {
            let frame = Frame::new(
                types::TASKS_REASSIGNED,
                json!({ "tasks": group, "agent": agent }),
            );
            self.emit(&room_id, &frame).await;
        }
        Ok(tasks)
    }

    /// Block a task for an agent.
    ///
    /// Inserts (or refreshes) the blocker, marks the agent blocked, and
    /// emits `tasks.blocked` followed by a fresh blocked summary.
    pub async fn block_task(&self, input: BlockTaskInput) -> DomainResult<TaskBlock> {
        let block = self.store.insert_task_block(input).await?;

        let store = self.store.clone();
        let check_in = AgentCheckIn {
            agent_name: block.blocked_agent.clone(),
            status: AgentStatus::Blocked,
            task_id: Some(block.task_id),
            note: Some(block.reason.clone()),
        };
        if let Err(err) = self
            .retry
            .execute(|| {
                let store = store.clone();
                let check_in = check_in.clone();
                async move { store.upsert_agent_activity(check_in).await }
            })
            .await
        {
            warn!(agent = %block.blocked_agent, error = %err, "agent activity upsert failed");
        }

        let frame = Frame::new(types::TASKS_BLOCKED, json!({ "blocker": block }));
        self.emit(&block.project_id, &frame).await;
        self.emit_blocked_summary(&block.project_id).await;
        Ok(block)
    }

    /// Resolve a blocker.
    ///
    /// Once no open blocker remains for the task its status returns to
    /// `todo`; the blocked agent is marked available and the room is told to
    /// start chasing the agent for an acknowledgment (`meta.notifyAgent`).
    pub async fn unblock_task(&self, input: UnblockTaskInput) -> DomainResult<Option<TaskBlock>> {
        let Some(block) = self.store.resolve_task_block(input).await? else {
            return Ok(None);
        };

        let still_open = self
            .store
            .list_blocked_tasks(true)
            .await?
            .iter()
            .any(|b| b.task_id == block.task_id && b.is_open());
        if !still_open {
            match self.update_single_status(block.task_id, TaskStatus::Todo).await {
                Ok(_) => {}
                Err(DomainError::TaskNotFound(id)) => {
                    warn!(task_id = %id, "unblocked a task that no longer exists");
                }
                Err(err) => return Err(err),
            }
        }

        let store = self.store.clone();
        let check_in = AgentCheckIn {
            agent_name: block.blocked_agent.clone(),
            status: AgentStatus::Available,
            task_id: Some(block.task_id),
            note: block.resolution_note.clone(),
        };
        if let Err(err) = self
            .retry
            .execute(|| {
                let store = store.clone();
                let check_in = check_in.clone();
                async move { store.upsert_agent_activity(check_in).await }
            })
            .await
        {
            warn!(agent = %block.blocked_agent, error = %err, "agent activity upsert failed");
        }

        let frame = Frame::new(types::TASKS_UNBLOCKED, json!({ "blocker": block }))
            .with_meta(json!({ "notifyAgent": block.blocked_agent }));
        self.emit(&block.project_id, &frame).await;
        self.emit_blocked_summary(&block.project_id).await;
        Ok(Some(block))
    }

    /// Record that an agent has seen an unblock.
    pub async fn acknowledge_unblock(
        &self,
        task_id: Uuid,
        agent: &str,
    ) -> DomainResult<Option<TaskBlock>> {
        let Some(block) = self.store.ack_task_block(task_id, agent).await? else {
            return Ok(None);
        };

        let frame = Frame::new(
            types::AGENTS_UNBLOCK_ACK,
            json!({
                "taskId": task_id,
                "agentName": agent,
                "blocker": block,
            }),
        );
        self.emit(&block.project_id, &frame).await;
        self.emit_blocked_summary(&block.project_id).await;
        Ok(Some(block))
    }

    /// Explicit agent check-in: upsert activity and reflect it into the
    /// agent's room.
    pub async fn check_in(
        &self,
        room_id: &str,
        input: AgentCheckIn,
    ) -> DomainResult<AgentActivity> {
        let store = self.store.clone();
        let activity = self
            .retry
            .execute(|| {
                let store = store.clone();
                let input = input.clone();
                async move { store.upsert_agent_activity(input).await }
            })
            .await?;

        let frame = Frame::new(types::AGENTS_ACTIVITY, json!({ "activity": activity }));
        self.emit(room_id, &frame).await;
        Ok(activity)
    }
}

fn group_by_room(tasks: &[Task]) -> HashMap<String, Vec<&Task>> {
    let mut groups: HashMap<String, Vec<&Task>> = HashMap::new();
    for task in tasks {
        groups.entry(task.project_id.clone()).or_default().push(task);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::{DatabaseConnection, SqliteTaskStore};

    // Service wired to an unroutable broadcast target: store effects apply,
    // emits are exercised and swallowed.
    async fn service() -> TaskService {
        let db = DatabaseConnection::new("sqlite::memory:", 5).await.unwrap();
        db.migrate().await.unwrap();
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(db.pool().clone()));
        TaskService::new(store, &Config::default())
            .with_broadcast_base("http://127.0.0.1:9".to_string())
    }

    #[tokio::test]
    async fn create_persists_and_survives_injection_failure() {
        let service = service().await;
        let task = service
            .create(CreateTaskInput {
                project_id: "r1".into(),
                title: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Todo);

        let stored = service.store().get_task_by_id(task.id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn update_single_status_missing_task_is_not_found() {
        let service = service().await;
        let err = service
            .update_single_status(Uuid::new_v4(), TaskStatus::Done)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn block_then_unblock_restores_todo_and_activity() {
        let service = service().await;
        let task = service
            .create(CreateTaskInput {
                project_id: "r1".into(),
                title: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let block = service
            .block_task(BlockTaskInput {
                project_id: "r1".into(),
                task_id: task.id,
                blocked_agent: "A".into(),
                reason: "missing asset".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(block.is_open());

        let blocked = service.store().get_task_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(blocked.status, TaskStatus::Blocked);
        let activity = service.store().list_agent_activity().await.unwrap();
        assert_eq!(activity[0].status, AgentStatus::Blocked);

        let resolved = service
            .unblock_task(UnblockTaskInput {
                task_id: task.id,
                blocked_agent: "A".into(),
                resolved_by: Some("ops".into()),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert!(resolved.resolved_at.is_some());

        let after = service.store().get_task_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Todo);
        let activity = service.store().list_agent_activity().await.unwrap();
        assert_eq!(activity[0].status, AgentStatus::Available);
    }

    #[tokio::test]
    async fn unblock_keeps_task_blocked_while_other_agents_wait() {
        let service = service().await;
        let task = service
            .create(CreateTaskInput {
                project_id: "r1".into(),
                title: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        for agent in ["A", "B"] {
            service
                .block_task(BlockTaskInput {
                    project_id: "r1".into(),
                    task_id: task.id,
                    blocked_agent: agent.into(),
                    reason: "shared dependency".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        service
            .unblock_task(UnblockTaskInput {
                task_id: task.id,
                blocked_agent: "A".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let still = service.store().get_task_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(still.status, TaskStatus::Blocked);
    }

    #[tokio::test]
    async fn unblock_unknown_key_skips_side_effects() {
        let service = service().await;
        let result = service
            .unblock_task(UnblockTaskInput {
                task_id: Uuid::new_v4(),
                blocked_agent: "A".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn acknowledge_marks_block_acked() {
        let service = service().await;
        let task = service
            .create(CreateTaskInput {
                project_id: "r1".into(),
                title: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        service
            .block_task(BlockTaskInput {
                project_id: "r1".into(),
                task_id: task.id,
                blocked_agent: "A".into(),
                reason: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        service
            .unblock_task(UnblockTaskInput {
                task_id: task.id,
                blocked_agent: "A".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let acked = service.acknowledge_unblock(task.id, "A").await.unwrap().unwrap();
        assert!(acked.acked);
        assert!(service.store().list_blocked_tasks(false).await.unwrap().is_empty());
    }
}
