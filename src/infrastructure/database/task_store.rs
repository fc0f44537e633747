//! SQLite implementation of the task store using sqlx.
//!
//! Queries are built at runtime with bound parameters and mapped by hand;
//! bulk mutations and the blocker upsert run inside explicit transactions.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::{
    AgentActivity, AgentCheckIn, AgentStatus, BlockSeverity, BlockTaskInput, CreateTaskInput,
    StatusUpdate, Task, TaskBlock, TaskCounts, TaskPriority, TaskStatus, UnblockTaskInput,
};
use crate::domain::ports::{TaskFilter, TaskStore};
use crate::infrastructure::database::utils::{now_ts, parse_opt_ts, parse_ts};

/// SQLite-backed [`TaskStore`].
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> StoreResult<Task> {
        let status: String = row.try_get("status").map_err(StoreError::from)?;
        let priority: String = row.try_get("priority").map_err(StoreError::from)?;
        Ok(Task {
            id: parse_uuid(&row.try_get::<String, _>("id").map_err(StoreError::from)?)?,
            project_id: row.try_get("project_id").map_err(StoreError::from)?,
            epic_id: row.try_get("epic_id").map_err(StoreError::from)?,
            parent_task_id: row
                .try_get::<Option<String>, _>("parent_task_id")
                .map_err(StoreError::from)?
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            title: row.try_get("title").map_err(StoreError::from)?,
            description: row.try_get("description").map_err(StoreError::from)?,
            status: TaskStatus::from_str(&status)
                .ok_or_else(|| StoreError::fatal(format!("unknown task status {status:?}")))?,
            priority: TaskPriority::from_str(&priority)
                .ok_or_else(|| StoreError::fatal(format!("unknown priority {priority:?}")))?,
            assigned_agent: row.try_get("assigned_agent").map_err(StoreError::from)?,
            estimated_hours: row.try_get("estimated_hours").map_err(StoreError::from)?,
            actual_hours: row.try_get("actual_hours").map_err(StoreError::from)?,
            requires_human_review: row
                .try_get::<i64, _>("requires_human_review")
                .map_err(StoreError::from)?
                != 0,
            review_notes: row.try_get("review_notes").map_err(StoreError::from)?,
            created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(StoreError::from)?)?,
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at").map_err(StoreError::from)?)?,
        })
    }

    fn row_to_block(row: &SqliteRow) -> StoreResult<TaskBlock> {
        let severity: String = row.try_get("severity").map_err(StoreError::from)?;
        Ok(TaskBlock {
            id: parse_uuid(&row.try_get::<String, _>("id").map_err(StoreError::from)?)?,
            project_id: row.try_get("project_id").map_err(StoreError::from)?,
            task_id: parse_uuid(&row.try_get::<String, _>("task_id").map_err(StoreError::from)?)?,
            blocked_agent: row.try_get("blocked_agent").map_err(StoreError::from)?,
            blocking_owner: row.try_get("blocking_owner").map_err(StoreError::from)?,
            reason: row.try_get("reason").map_err(StoreError::from)?,
            severity: BlockSeverity::from_str(&severity)
                .ok_or_else(|| StoreError::fatal(format!("unknown severity {severity:?}")))?,
            requires_human_intervention: row
                .try_get::<i64, _>("requires_human_intervention")
                .map_err(StoreError::from)?
                != 0,
            resolved_at: parse_opt_ts(
                row.try_get::<Option<String>, _>("resolved_at")
                    .map_err(StoreError::from)?
                    .as_deref(),
            )?,
            resolved_by: row.try_get("resolved_by").map_err(StoreError::from)?,
            resolution_note: row.try_get("resolution_note").map_err(StoreError::from)?,
            acked: row.try_get::<i64, _>("acked").map_err(StoreError::from)? != 0,
            last_notified: parse_opt_ts(
                row.try_get::<Option<String>, _>("last_notified")
                    .map_err(StoreError::from)?
                    .as_deref(),
            )?,
            created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(StoreError::from)?)?,
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at").map_err(StoreError::from)?)?,
        })
    }

    fn row_to_activity(row: &SqliteRow) -> StoreResult<AgentActivity> {
        let status: String = row.try_get("status").map_err(StoreError::from)?;
        Ok(AgentActivity {
            agent_name: row.try_get("agent_name").map_err(StoreError::from)?,
            status: AgentStatus::from_str(&status)
                .ok_or_else(|| StoreError::fatal(format!("unknown agent status {status:?}")))?,
            task_id: row
                .try_get::<Option<String>, _>("task_id")
                .map_err(StoreError::from)?
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            note: row.try_get("note").map_err(StoreError::from)?,
            last_check_in: parse_ts(
                &row.try_get::<String, _>("last_check_in").map_err(StoreError::from)?,
            )?,
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at").map_err(StoreError::from)?)?,
        })
    }

    async fn fetch_block_by_id(&self, id: Uuid) -> StoreResult<Option<TaskBlock>> {
        let row = sqlx::query("SELECT * FROM task_blocks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.as_ref().map(Self::row_to_block).transpose()
    }
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::fatal(format!("invalid UUID {s:?}: {e}")))
}

/// SQL expression ranking priorities so `critical` sorts first.
const PRIORITY_RANK: &str =
    "CASE priority WHEN 'critical' THEN 4 WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1 END";

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn list_tasks(&self, filter: TaskFilter) -> StoreResult<Vec<Task>> {
        if let Some(ids) = &filter.task_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM tasks WHERE 1=1");
        if let Some(project_id) = &filter.project_id {
            qb.push(" AND project_id = ").push_bind(project_id.clone());
        }
        if let Some(epic_id) = &filter.epic_id {
            qb.push(" AND epic_id = ").push_bind(epic_id.clone());
        }
        if let Some(parent_task_id) = &filter.parent_task_id {
            qb.push(" AND parent_task_id = ").push_bind(parent_task_id.to_string());
        }
        if let Some(agent) = &filter.agent {
            qb.push(" AND assigned_agent = ").push_bind(agent.clone());
        }
        if let Some(status) = &filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(search) = &filter.search {
            // instr() keeps the match case-sensitive; LIKE would fold ASCII case.
            qb.push(" AND (instr(title, ")
                .push_bind(search.clone())
                .push(") > 0 OR instr(description, ")
                .push_bind(search.clone())
                .push(") > 0 OR instr(COALESCE(assigned_agent, ''), ")
                .push_bind(search.clone())
                .push(") > 0)");
        }
        if let Some(ids) = &filter.task_ids {
            qb.push(" AND id IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id.to_string());
            }
            qb.push(")");
        }
        qb.push(" ORDER BY updated_at DESC");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(StoreError::from)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_task_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list_open_tasks(&self) -> StoreResult<Vec<Task>> {
        let sql = format!(
            "SELECT * FROM tasks WHERE status != 'done' ORDER BY {PRIORITY_RANK} DESC, updated_at DESC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(StoreError::from)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn create_task(&self, input: CreateTaskInput) -> StoreResult<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            project_id: input.project_id,
            epic_id: input.epic_id,
            parent_task_id: input.parent_task_id,
            title: input.title,
            description: input.description.unwrap_or_default(),
            status: input.status.unwrap_or_default(),
            priority: input.priority.unwrap_or_default(),
            assigned_agent: input.assigned_agent,
            estimated_hours: input.estimated_hours,
            actual_hours: input.actual_hours,
            requires_human_review: input.requires_human_review.unwrap_or(false),
            review_notes: input.review_notes,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, project_id, epic_id, parent_task_id, title, description,
                status, priority, assigned_agent, estimated_hours, actual_hours,
                requires_human_review, review_notes, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.project_id)
        .bind(&task.epic_id)
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(&task.assigned_agent)
        .bind(task.estimated_hours)
        .bind(task.actual_hours)
        .bind(task.requires_human_review as i64)
        .bind(&task.review_notes)
        .bind(now_ts())
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        debug!(task_id = %task.id, project_id = %task.project_id, "task created");
        Ok(task)
    }

    async fn bulk_reassign_tasks(&self, ids: &[Uuid], agent: &str) -> StoreResult<Vec<Task>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE tasks SET assigned_agent = ");
        qb.push_bind(agent.to_string())
            .push(", updated_at = ")
            .push_bind(now_ts())
            .push(" WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        qb.push(")");
        qb.build().execute(&mut *tx).await.map_err(StoreError::from)?;

        let mut select: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM tasks WHERE id IN (");
        let mut separated = select.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        select.push(") ORDER BY updated_at DESC");
        let rows = select.build().fetch_all(&mut *tx).await.map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn bulk_update_task_statuses(&self, updates: &[StatusUpdate]) -> StoreResult<Vec<Task>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        for update in updates {
            sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
                .bind(update.status.as_str())
                .bind(now_ts())
                .bind(update.task_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        }

        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = updates
            .iter()
            .map(|u| u.task_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let mut select: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM tasks WHERE id IN (");
        let mut separated = select.separated(", ");
        for id in &ids {
            separated.push_bind(id.to_string());
        }
        select.push(") ORDER BY updated_at DESC");
        let rows = select.build().fetch_all(&mut *tx).await.map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn task_counts(&self) -> StoreResult<TaskCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let mut counts = TaskCounts::default();
        for row in &rows {
            let status: String = row.try_get("status").map_err(StoreError::from)?;
            let n: i64 = row.try_get("n").map_err(StoreError::from)?;
            match TaskStatus::from_str(&status) {
                Some(status) => {
                    counts.by_status.insert(status, n as u64);
                    counts.total += n as u64;
                }
                None => warn!(%status, "skipping unknown status in counts"),
            }
        }
        Ok(counts)
    }

    async fn list_agent_activity(&self) -> StoreResult<Vec<AgentActivity>> {
        let rows = sqlx::query("SELECT * FROM agent_activity ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.iter().map(Self::row_to_activity).collect()
    }

    async fn upsert_agent_activity(&self, input: AgentCheckIn) -> StoreResult<AgentActivity> {
        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO agent_activity (agent_name, status, task_id, note, last_check_in, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(agent_name) DO UPDATE SET
                status = excluded.status,
                task_id = excluded.task_id,
                note = excluded.note,
                last_check_in = excluded.last_check_in,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&input.agent_name)
        .bind(input.status.as_str())
        .bind(input.task_id.map(|id| id.to_string()))
        .bind(&input.note)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let row = sqlx::query("SELECT * FROM agent_activity WHERE agent_name = ?")
            .bind(&input.agent_name)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Self::row_to_activity(&row)
    }

    async fn insert_task_block(&self, input: BlockTaskInput) -> StoreResult<TaskBlock> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let now = now_ts();

        let existing = sqlx::query(
            "SELECT id FROM task_blocks WHERE task_id = ? AND blocked_agent = ? AND resolved_at IS NULL",
        )
        .bind(input.task_id.to_string())
        .bind(&input.blocked_agent)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        let block_id = match existing {
            Some(row) => {
                // Re-block of the same open key: refresh reason/owner, drop ack.
                let id: String = row.try_get("id").map_err(StoreError::from)?;
                sqlx::query(
                    r#"
                    UPDATE task_blocks
                    SET reason = ?, blocking_owner = ?, acked = 0, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&input.reason)
                .bind(&input.blocking_owner)
                .bind(&now)
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
                parse_uuid(&id)?
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO task_blocks (
                        id, project_id, task_id, blocked_agent, blocking_owner, reason,
                        severity, requires_human_intervention, acked, created_at, updated_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                    "#,
                )
                .bind(id.to_string())
                .bind(&input.project_id)
                .bind(input.task_id.to_string())
                .bind(&input.blocked_agent)
                .bind(&input.blocking_owner)
                .bind(&input.reason)
                .bind(input.severity.unwrap_or_default().as_str())
                .bind(input.requires_human_intervention.unwrap_or(false) as i64)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
                id
            }
        };

        // A task with an open blocker is blocked; same transaction so the
        // invariant is never observable as violated.
        sqlx::query("UPDATE tasks SET status = 'blocked', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(input.task_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        let row = sqlx::query("SELECT * FROM task_blocks WHERE id = ?")
            .bind(block_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        let block = Self::row_to_block(&row)?;

        tx.commit().await.map_err(StoreError::from)?;
        Ok(block)
    }

    async fn resolve_task_block(&self, input: UnblockTaskInput) -> StoreResult<Option<TaskBlock>> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let now = now_ts();

        let open = sqlx::query(
            "SELECT id FROM task_blocks WHERE task_id = ? AND blocked_agent = ? AND resolved_at IS NULL",
        )
        .bind(input.task_id.to_string())
        .bind(&input.blocked_agent)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        if let Some(row) = open {
            let id: String = row.try_get("id").map_err(StoreError::from)?;
            sqlx::query(
                r#"
                UPDATE task_blocks
                SET resolved_at = ?, resolved_by = ?, resolution_note = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&now)
            .bind(&input.resolved_by)
            .bind(&input.resolution_note)
            .bind(&now)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

            let row = sqlx::query("SELECT * FROM task_blocks WHERE id = ?")
                .bind(&id)
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::from)?;
            let block = Self::row_to_block(&row)?;
            tx.commit().await.map_err(StoreError::from)?;
            return Ok(Some(block));
        }
        tx.commit().await.map_err(StoreError::from)?;

        // Already resolved: return the latest resolved row unchanged.
        let row = sqlx::query(
            r#"
            SELECT * FROM task_blocks
            WHERE task_id = ? AND blocked_agent = ? AND resolved_at IS NOT NULL
            ORDER BY updated_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(input.task_id.to_string())
        .bind(&input.blocked_agent)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        row.as_ref().map(Self::row_to_block).transpose()
    }

    async fn ack_task_block(&self, task_id: Uuid, agent: &str) -> StoreResult<Option<TaskBlock>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM task_blocks
            WHERE task_id = ? AND blocked_agent = ?
            ORDER BY updated_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(task_id.to_string())
        .bind(agent)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id").map_err(StoreError::from)?;

        sqlx::query("UPDATE task_blocks SET acked = 1, updated_at = ? WHERE id = ?")
            .bind(now_ts())
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        self.fetch_block_by_id(parse_uuid(&id)?).await
    }

    async fn list_blocked_tasks(&self, include_acked: bool) -> StoreResult<Vec<TaskBlock>> {
        let sql = if include_acked {
            "SELECT * FROM task_blocks ORDER BY updated_at DESC"
        } else {
            "SELECT * FROM task_blocks WHERE acked = 0 ORDER BY updated_at DESC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await.map_err(StoreError::from)?;
        rows.iter().map(Self::row_to_block).collect()
    }

    async fn touch_block_last_notified(&self, block_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE task_blocks SET last_notified = ? WHERE id = ?")
            .bind(now_ts())
            .bind(block_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("blocker {block_id} not found")));
        }
        Ok(())
    }
}
