//! End-to-end coordination flows over live WebSockets.

mod helpers;

use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use helpers::{start_server, WsClient};
use taskroom::domain::models::frame::types;
use taskroom::domain::models::{
    BlockTaskInput, CreateTaskInput, Frame, RoomConfig, TaskStatus, UnblockTaskInput,
};
use taskroom::domain::ports::{RoomStateStore, TaskFilter};

fn fast_room() -> RoomConfig {
    RoomConfig {
        unblock_ping_interval_ms: 150,
        ..Default::default()
    }
}

async fn register(client: &mut WsClient, agent: &str) {
    client
        .send_frame(&Frame::new(types::AGENTS_REGISTER, json!({ "agentName": agent })))
        .await;
    client.next_frame_of(types::AGENTS_REGISTERED).await;
}

#[tokio::test]
async fn create_and_assign_reaches_store_and_wire() {
    let server = start_server(RoomConfig::default()).await;
    let mut client = WsClient::connect(server.addr, "r1").await;

    let welcome = client.next_frame_of(types::SYSTEM_WELCOME).await;
    assert_eq!(welcome.payload["roomId"], "r1");

    register(&mut client, "A").await;
    client.next_frame_of(types::TASKS_STATS).await;

    client
        .send_frame(
            &Frame::new(
                types::TASKS_CREATE,
                json!({ "projectId": "r1", "title": "x" }),
            )
            .with_request_id(Some("c-1".into())),
        )
        .await;

    let created = client.next_frame_of(types::TASKS_CREATED).await;
    let task = &created.payload["task"];
    assert_eq!(task["status"], "todo");
    let id: Uuid = serde_json::from_value(task["id"].clone()).expect("task id is a uuid");

    let listed = server
        .store
        .list_tasks(TaskFilter { project_id: Some("r1".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);

    client.close().await;
}

#[tokio::test]
async fn externally_injected_block_prompts_the_agent() {
    let server = start_server(RoomConfig::default()).await;
    let mut client = WsClient::connect(server.addr, "r1").await;
    client.next_frame_of(types::SYSTEM_WELCOME).await;
    register(&mut client, "A").await;

    let task = server
        .store
        .create_task(CreateTaskInput {
            project_id: "r1".into(),
            title: "x".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let block = server
        .store
        .insert_task_block(BlockTaskInput {
            project_id: "r1".into(),
            task_id: task.id,
            blocked_agent: "A".into(),
            reason: "missing asset".into(),
            severity: Some(taskroom::domain::models::BlockSeverity::High),
            ..Default::default()
        })
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .post(server.url("/rooms/r1/broadcast"))
        .json(&Frame::new(types::TASKS_BLOCKED, json!({ "blocker": block })))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let summary = client.next_frame_of(types::TASKS_BLOCKED_SUMMARY).await;
    let blockers = summary.payload["blockers"].as_array().unwrap();
    assert!(blockers.iter().any(|b| b["taskId"] == json!(task.id)));

    let prompt = client.next_frame_of(types::AGENTS_PROMPT_UPDATE).await;
    assert_eq!(prompt.payload["blocker"]["taskId"], json!(task.id));
    assert_eq!(prompt.payload["blocker"]["blockedAgent"], "A");

    client.close().await;
}

#[tokio::test]
async fn unblock_starts_reminders_and_ack_silences_them() {
    let server = start_server(fast_room()).await;
    let mut client = WsClient::connect(server.addr, "r1").await;
    client.next_frame_of(types::SYSTEM_WELCOME).await;
    register(&mut client, "A").await;

    let task = server
        .service
        .create(CreateTaskInput {
            project_id: "r1".into(),
            title: "x".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    server
        .service
        .block_task(BlockTaskInput {
            project_id: "r1".into(),
            task_id: task.id,
            blocked_agent: "A".into(),
            reason: "missing asset".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let resolved = server
        .service
        .unblock_task(UnblockTaskInput {
            task_id: task.id,
            blocked_agent: "A".into(),
            resolved_by: Some("ops".into()),
            ..Default::default()
        })
        .await
        .unwrap()
        .expect("blocker should resolve");
    assert!(resolved.resolved_at.is_some());

    // Status is forced back to todo.
    let after = server.store.get_task_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Todo);

    // The broadcast reflection carries the resolved blocker.
    let unblocked = client.next_frame_of(types::TASKS_UNBLOCKED).await;
    assert_eq!(unblocked.payload["blocker"]["taskId"], json!(task.id));
    assert!(!unblocked.payload["blocker"]["resolvedAt"].is_null());

    // Immediate reminder plus at least one 150 ms repeat.
    client.next_frame_of(types::AGENTS_UNBLOCKED_REMINDER).await;
    client.next_frame_of(types::AGENTS_UNBLOCKED_REMINDER).await;

    // Acknowledge.
    client
        .send_frame(&Frame::new(
            types::AGENTS_ACK_UNBLOCK,
            json!({ "taskId": task.id, "agentName": "A" }),
        ))
        .await;
    client.next_frame_of(types::AGENTS_UNBLOCK_ACK).await;

    // The refreshed summary omits the acked blocker.
    let summary = client.next_frame_of(types::TASKS_BLOCKED_SUMMARY).await;
    assert_eq!(summary.payload["count"], 0);

    // Reminders go quiet: drain what is in flight, wait several reminder
    // periods, and assert nothing new arrives.
    client.drain().await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let late = client.drain().await;
    assert!(
        late.iter().all(|f| f.kind != types::AGENTS_UNBLOCKED_REMINDER),
        "reminders kept firing after ack"
    );

    // The room recorded the coordination pattern.
    let state = server
        .room_store
        .load("r1")
        .await
        .unwrap()
        .expect("room state persisted");
    let trailing = state.coordination_patterns.last().expect("pattern recorded");
    assert_eq!(trailing.pattern, "unblock_ack");
    assert!(trailing.success);

    client.close().await;
}

#[tokio::test]
async fn block_for_absent_agent_falls_back_to_broadcast() {
    let server = start_server(RoomConfig::default()).await;
    let mut observer = WsClient::connect(server.addr, "r1").await;
    observer.next_frame_of(types::SYSTEM_WELCOME).await;
    register(&mut observer, "observer").await;

    let task = server
        .service
        .create(CreateTaskInput {
            project_id: "r1".into(),
            title: "x".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    // "A" has no live connection.
    server
        .service
        .block_task(BlockTaskInput {
            project_id: "r1".into(),
            task_id: task.id,
            blocked_agent: "A".into(),
            reason: "nobody home".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let prompt = observer.next_frame_of(types::AGENTS_PROMPT_UPDATE).await;
    assert_eq!(prompt.payload["blocker"]["blockedAgent"], "A");

    observer.close().await;
}

#[tokio::test]
async fn frames_keep_relative_order_across_connections() {
    let server = start_server(RoomConfig::default()).await;
    let mut a = WsClient::connect(server.addr, "r1").await;
    let mut b = WsClient::connect(server.addr, "r1").await;
    a.next_frame_of(types::SYSTEM_WELCOME).await;
    b.next_frame_of(types::SYSTEM_WELCOME).await;

    // Relay three custom frames through the room; both observers must see
    // them in emission order.
    for i in 0..3 {
        a.send_frame(&Frame::new("agents.note", json!({ "seq": i }))).await;
    }
    for observer in [&mut a, &mut b] {
        for expected in 0..3 {
            let frame = observer.next_frame_of("agents.note").await;
            assert_eq!(frame.payload["seq"], expected);
        }
    }

    a.close().await;
    b.close().await;
}
