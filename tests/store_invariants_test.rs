//! Store-level invariants exercised against a file-backed SQLite database.

use std::sync::Arc;
use uuid::Uuid;

use taskroom::domain::models::{
    BlockTaskInput, Config, CreateTaskInput, TaskStatus, UnblockTaskInput,
};
use taskroom::domain::ports::TaskStore;
use taskroom::infrastructure::database::{DatabaseConnection, SqliteTaskStore};
use taskroom::services::TaskService;

async fn file_store() -> (SqliteTaskStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let db = DatabaseConnection::new(&format!("sqlite:{}", path.display()), 5)
        .await
        .unwrap();
    db.migrate().await.unwrap();
    (SqliteTaskStore::new(db.pool().clone()), dir)
}

fn block_input(task_id: Uuid, agent: &str, reason: &str) -> BlockTaskInput {
    BlockTaskInput {
        project_id: "r1".into(),
        task_id,
        blocked_agent: agent.into(),
        reason: reason.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn reblock_leaves_one_open_row_with_latest_reason() {
    let (store, _dir) = file_store().await;
    let task = store
        .create_task(CreateTaskInput {
            project_id: "r1".into(),
            title: "x".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    store.insert_task_block(block_input(task.id, "A", "reason1")).await.unwrap();
    store.insert_task_block(block_input(task.id, "A", "reason2")).await.unwrap();

    let rows = store.list_blocked_tasks(true).await.unwrap();
    let open: Vec<_> = rows
        .iter()
        .filter(|b| b.task_id == task.id && b.blocked_agent == "A" && b.is_open())
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].reason, "reason2");
    assert!(!open[0].acked);
}

#[tokio::test]
async fn open_blocker_forces_task_status_blocked() {
    let (store, _dir) = file_store().await;
    let task = store
        .create_task(CreateTaskInput {
            project_id: "r1".into(),
            title: "x".into(),
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        })
        .await
        .unwrap();

    store.insert_task_block(block_input(task.id, "A", "dep")).await.unwrap();

    // Invariant: every open blocker's task reads blocked.
    let blocks = store.list_blocked_tasks(true).await.unwrap();
    for block in blocks.iter().filter(|b| b.is_open()) {
        let owner = store.get_task_by_id(block.task_id).await.unwrap().unwrap();
        assert_eq!(owner.status, TaskStatus::Blocked);
    }
}

#[tokio::test]
async fn distinct_agents_hold_independent_blockers() {
    let (store, _dir) = file_store().await;
    let task = store
        .create_task(CreateTaskInput {
            project_id: "r1".into(),
            title: "x".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    store.insert_task_block(block_input(task.id, "A", "a-dep")).await.unwrap();
    store.insert_task_block(block_input(task.id, "B", "b-dep")).await.unwrap();

    let open: Vec<_> = store
        .list_blocked_tasks(true)
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.is_open())
        .collect();
    assert_eq!(open.len(), 2);

    store
        .resolve_task_block(UnblockTaskInput {
            task_id: task.id,
            blocked_agent: "A".into(),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();

    let open: Vec<_> = store
        .list_blocked_tasks(true)
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.is_open())
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].blocked_agent, "B");
}

#[tokio::test]
async fn service_unblock_waits_for_last_open_blocker() {
    let (store, _dir) = file_store().await;
    let store: Arc<dyn TaskStore> = Arc::new(store);
    // Unroutable broadcast base: store semantics only.
    let service = TaskService::new(store.clone(), &Config::default())
        .with_broadcast_base("http://127.0.0.1:9".to_string());

    let task = service
        .create(CreateTaskInput {
            project_id: "r1".into(),
            title: "x".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    service.block_task(block_input(task.id, "A", "a-dep")).await.unwrap();
    service.block_task(block_input(task.id, "B", "b-dep")).await.unwrap();

    service
        .unblock_task(UnblockTaskInput {
            task_id: task.id,
            blocked_agent: "A".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let mid = store.get_task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(mid.status, TaskStatus::Blocked);

    service
        .unblock_task(UnblockTaskInput {
            task_id: task.id,
            blocked_agent: "B".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let done = store.get_task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Todo);
}

#[tokio::test]
async fn blocked_list_orders_by_recency() {
    let (store, _dir) = file_store().await;
    let first = store
        .create_task(CreateTaskInput {
            project_id: "r1".into(),
            title: "first".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let second = store
        .create_task(CreateTaskInput {
            project_id: "r1".into(),
            title: "second".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    store.insert_task_block(block_input(first.id, "A", "older")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.insert_task_block(block_input(second.id, "B", "newer")).await.unwrap();

    let rows = store.list_blocked_tasks(false).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].reason, "newer");
    assert_eq!(rows[1].reason, "older");
}
