//! The room actor.
//!
//! Exactly one actor per live room id. The actor task owns the connection
//! set, the ack-reminder map, the heartbeat and blocked-summary timers, and
//! the persistent room state; every mutation happens inside its own loop.
//! All external touch points — ingress, `/broadcast`, timer ticks — post
//! [`RoomCommand`]s into an unbounded mailbox, so a handler that triggers a
//! re-injection into its own room can never deadlock.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::StoreResult;
use crate::domain::models::frame::types;
use crate::domain::models::{
    CreateTaskInput, Frame, RoomConfig, RoomState, StatusUpdate, TaskBlock, TaskStatus,
};
use crate::domain::ports::{DocsTool, RoomStateStore, TaskStore};
use crate::infrastructure::database::RetryPolicy;
use crate::room::connection::{
    broadcast, ConnectionHandle, ConnectionId, CLOSE_INTERNAL_ERROR,
};
use crate::services::TaskService;

/// Commands accepted by a room actor's mailbox.
#[derive(Debug)]
pub enum RoomCommand {
    /// A WebSocket finished its upgrade and belongs to this room now.
    Attach { handle: ConnectionHandle },
    /// Raw inbound bytes from a connection.
    Inbound { conn_id: ConnectionId, data: Vec<u8> },
    /// Connection closed; `error` requests a 1011 close code first.
    Detach { conn_id: ConnectionId, error: bool },
    /// Server-originated frame from the `/broadcast` path.
    Inject { frame: Frame },
    HeartbeatTick,
    SummaryTick,
    ReminderTick { agent: String, task_id: Uuid },
}

/// Cheap cloneable sender half of a room's mailbox.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn send(&self, command: RoomCommand) {
        if self.tx.send(command).is_err() {
            warn!("room mailbox closed, command dropped");
        }
    }
}

/// Everything a room actor needs from the outside world.
#[derive(Clone)]
pub struct RoomDeps {
    pub store: Arc<dyn TaskStore>,
    pub room_store: Arc<dyn RoomStateStore>,
    pub docs: Arc<dyn DocsTool>,
    pub service: Arc<TaskService>,
    pub config: RoomConfig,
    pub retry: RetryPolicy,
}

type ReminderKey = (String, Uuid);

struct ReminderEntry {
    block: TaskBlock,
    timer: JoinHandle<()>,
}

/// Spawn the actor task for a room and return its mailbox handle.
pub fn spawn(room_id: String, deps: RoomDeps) -> RoomHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = RoomActor {
        room_id,
        rx,
        tx: tx.clone(),
        connections: HashMap::new(),
        reminders: HashMap::new(),
        heartbeat: None,
        summary: None,
        state: None,
        deps,
    };
    tokio::spawn(actor.run());
    RoomHandle { tx }
}

struct RoomActor {
    room_id: String,
    rx: mpsc::UnboundedReceiver<RoomCommand>,
    tx: mpsc::UnboundedSender<RoomCommand>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    reminders: HashMap<ReminderKey, ReminderEntry>,
    heartbeat: Option<JoinHandle<()>>,
    summary: Option<JoinHandle<()>>,
    state: Option<RoomState>,
    deps: RoomDeps,
}

// ---------------------------------------------------------------------------
// Inbound payload schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload {
    agent_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckUnblockPayload {
    task_id: Uuid,
    agent_name: String,
}

#[derive(Debug, Deserialize)]
struct FetchByAgentPayload {
    agent: String,
}

#[derive(Debug, Deserialize)]
struct FetchByIdPayload {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusPayload {
    task_id: Uuid,
    status: TaskStatus,
}

#[derive(Debug, Deserialize)]
struct BulkUpdateStatusPayload {
    updates: Vec<StatusUpdate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkReassignPayload {
    task_ids: Vec<Uuid>,
    agent: String,
}

#[derive(Debug, Deserialize)]
struct DocsQueryPayload {
    query: String,
    #[serde(default)]
    topic: Option<String>,
}

fn parse_payload<T: DeserializeOwned>(frame: &Frame) -> Result<T, String> {
    serde_json::from_value(frame.payload.clone()).map_err(|e| e.to_string())
}

impl RoomActor {
    async fn run(mut self) {
        info!(room_id = %self.room_id, "room actor started");
        while let Some(command) = self.rx.recv().await {
            match command {
                RoomCommand::Attach { handle } => self.on_attach(handle).await,
                RoomCommand::Inbound { conn_id, data } => self.on_inbound(conn_id, data).await,
                RoomCommand::Detach { conn_id, error } => self.on_detach(conn_id, error),
                RoomCommand::Inject { frame } => self.on_inject(frame).await,
                RoomCommand::HeartbeatTick => self.on_heartbeat_tick(),
                RoomCommand::SummaryTick => self.on_summary_tick().await,
                RoomCommand::ReminderTick { agent, task_id } => {
                    self.on_reminder_tick(agent, task_id).await;
                }
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if let Some(handle) = self.summary.take() {
            handle.abort();
        }
        for (_, entry) in self.reminders.drain() {
            entry.timer.abort();
        }
        info!(room_id = %self.room_id, "room actor stopped");
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    async fn on_attach(&mut self, handle: ConnectionHandle) {
        let conn_id = handle.id;
        let connected_at = handle.connected_at;
        self.connections.insert(conn_id, handle);
        debug!(room_id = %self.room_id, %conn_id, "connection attached");

        if self.state.is_none() {
            self.state = Some(self.load_or_init_state().await);
        }

        let welcome = Frame::new(
            types::SYSTEM_WELCOME,
            json!({
                "roomId": self.room_id,
                "connectionId": conn_id,
                "agentName": serde_json::Value::Null,
                "connectedAt": connected_at,
            }),
        );
        self.unicast(conn_id, &welcome);

        self.broadcast(&self.state_frame());
        self.ensure_heartbeat_timer();
        self.ensure_summary_timer();
        self.broadcast_blocked_summary().await;
        self.persist_state().await;
    }

    fn on_detach(&mut self, conn_id: ConnectionId, error: bool) {
        if error {
            if let Some(conn) = self.connections.get(&conn_id) {
                conn.send_close(CLOSE_INTERNAL_ERROR);
            }
        }
        if self.connections.remove(&conn_id).is_none() {
            return;
        }
        debug!(room_id = %self.room_id, %conn_id, error, "connection detached");
        self.broadcast(&self.state_frame());

        if self.connections.is_empty() {
            // Ack reminders outlive the connection set: a returning agent
            // still expects to be chased.
            if let Some(handle) = self.heartbeat.take() {
                handle.abort();
            }
            if let Some(handle) = self.summary.take() {
                handle.abort();
            }
        }
    }

    async fn on_inbound(&mut self, conn_id: ConnectionId, data: Vec<u8>) {
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.last_seen = Utc::now();
        }

        let frame = Frame::from_bytes(&data);
        if frame.kind == types::PING {
            let pong = Frame::new(types::PONG, json!({ "now": Utc::now() }))
                .with_request_id(frame.request_id);
            self.unicast(conn_id, &pong);
            return;
        }
        if frame.kind == types::ERROR {
            // Malformed bytes; the socket stays open.
            warn!(room_id = %self.room_id, %conn_id, "malformed inbound frame");
            return;
        }

        self.dispatch(conn_id, frame).await;
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(&mut self, conn_id: ConnectionId, frame: Frame) {
        let request_id = frame.request_id.clone();
        match frame.kind.as_str() {
            types::AGENTS_REGISTER => match parse_payload::<RegisterPayload>(&frame) {
                Ok(payload) => self.handle_register(conn_id, payload.agent_name, request_id).await,
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            types::AGENTS_REQUEST_STATS => {
                self.send_stats(conn_id, request_id).await;
            }
            types::AGENTS_ACK_UNBLOCK => match parse_payload::<AckUnblockPayload>(&frame) {
                Ok(payload) => {
                    self.handle_ack_unblock(conn_id, payload, request_id).await;
                }
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            types::TASKS_FETCH_BY_AGENT => match parse_payload::<FetchByAgentPayload>(&frame) {
                Ok(payload) => {
                    let store = self.deps.store.clone();
                    let agent = payload.agent.clone();
                    let result = self
                        .deps
                        .retry
                        .execute(|| {
                            let store = store.clone();
                            let agent = agent.clone();
                            async move {
                                store
                                    .list_tasks(crate::domain::ports::TaskFilter::for_agent(agent))
                                    .await
                            }
                        })
                        .await;
                    match result {
                        Ok(tasks) => {
                            let reply = Frame::new(
                                types::TASKS_AGENT_SNAPSHOT,
                                json!({ "agent": payload.agent, "tasks": tasks }),
                            )
                            .with_request_id(request_id);
                            self.unicast(conn_id, &reply);
                        }
                        Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
                    }
                }
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            types::TASKS_FETCH_BY_ID => match parse_payload::<FetchByIdPayload>(&frame) {
                Ok(payload) => {
                    let store = self.deps.store.clone();
                    let result = self
                        .deps
                        .retry
                        .execute(|| {
                            let store = store.clone();
                            async move { store.get_task_by_id(payload.id).await }
                        })
                        .await;
                    match result {
                        Ok(task) => {
                            let reply = Frame::new(types::TASKS_DETAIL, json!({ "task": task }))
                                .with_request_id(request_id);
                            self.unicast(conn_id, &reply);
                        }
                        Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
                    }
                }
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            types::TASKS_SEARCH => match parse_payload::<SearchPayload>(&frame) {
                Ok(payload) => {
                    let store = self.deps.store.clone();
                    let query = payload.query.clone();
                    let result = self
                        .deps
                        .retry
                        .execute(|| {
                            let store = store.clone();
                            let query = query.clone();
                            async move {
                                store
                                    .list_tasks(crate::domain::ports::TaskFilter::for_search(query))
                                    .await
                            }
                        })
                        .await;
                    match result {
                        Ok(tasks) => {
                            let reply = Frame::new(
                                types::TASKS_SEARCH_RESULTS,
                                json!({ "query": payload.query, "tasks": tasks }),
                            )
                            .with_request_id(request_id);
                            self.unicast(conn_id, &reply);
                        }
                        Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
                    }
                }
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            types::TASKS_FETCH_OPEN => {
                let store = self.deps.store.clone();
                let result = self
                    .deps
                    .retry
                    .execute(|| {
                        let store = store.clone();
                        async move { store.list_open_tasks().await }
                    })
                    .await;
                match result {
                    Ok(tasks) => {
                        let reply = Frame::new(types::TASKS_OPEN, json!({ "tasks": tasks }))
                            .with_request_id(request_id);
                        self.unicast(conn_id, &reply);
                    }
                    Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
                }
            }
            types::TASKS_CREATE => match parse_payload::<CreateTaskInput>(&frame) {
                Ok(input) => match self.deps.service.create(input).await {
                    Ok(task) => {
                        let reply = Frame::new(types::TASKS_CREATED, json!({ "task": task }))
                            .with_request_id(request_id);
                        self.unicast(conn_id, &reply);
                        self.schedule_summary_refresh();
                    }
                    Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
                },
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            types::TASKS_UPDATE_STATUS => match parse_payload::<UpdateStatusPayload>(&frame) {
                Ok(payload) => {
                    match self
                        .deps
                        .service
                        .update_single_status(payload.task_id, payload.status)
                        .await
                    {
                        Ok(task) => {
                            let reply =
                                Frame::new(types::TASKS_STATUS_UPDATED, json!({ "task": task }))
                                    .with_request_id(request_id);
                            self.unicast(conn_id, &reply);
                            self.schedule_summary_refresh();
                        }
                        Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
                    }
                }
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            types::TASKS_BULK_UPDATE_STATUS => {
                match parse_payload::<BulkUpdateStatusPayload>(&frame) {
                    Ok(payload) => match self.deps.service.update_statuses(&payload.updates).await {
                        Ok(tasks) => {
                            let reply =
                                Frame::new(types::TASKS_STATUS_UPDATED, json!({ "tasks": tasks }))
                                    .with_request_id(request_id);
                            self.unicast(conn_id, &reply);
                            self.schedule_summary_refresh();
                        }
                        Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
                    },
                    Err(message) => self.reply_error(conn_id, message, request_id),
                }
            }
            types::TASKS_BULK_REASSIGN => match parse_payload::<BulkReassignPayload>(&frame) {
                Ok(payload) => {
                    match self
                        .deps
                        .service
                        .reassign(&payload.task_ids, &payload.agent)
                        .await
                    {
                        Ok(tasks) => {
                            let reply = Frame::new(
                                types::TASKS_REASSIGNED,
                                json!({ "tasks": tasks, "agent": payload.agent }),
                            )
                            .with_request_id(request_id);
                            self.unicast(conn_id, &reply);
                            self.schedule_summary_refresh();
                        }
                        Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
                    }
                }
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            types::DOCS_QUERY => match parse_payload::<DocsQueryPayload>(&frame) {
                Ok(payload) => self.handle_docs_query(conn_id, payload, request_id).await,
                Err(message) => self.reply_error(conn_id, message, request_id),
            },
            _ => {
                // Unknown types are relayed untouched so agents can extend
                // the protocol among themselves.
                self.broadcast(&frame);
            }
        }
    }

    async fn handle_register(
        &mut self,
        conn_id: ConnectionId,
        agent_name: String,
        request_id: Option<String>,
    ) {
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.agent_name = Some(agent_name.clone());
        }
        if let Some(state) = self.state.as_mut() {
            state.prefs_entry(&agent_name);
        }
        self.persist_state().await;

        let registered = Frame::new(
            types::AGENTS_REGISTERED,
            json!({
                "agentName": agent_name,
                "roomId": self.room_id,
                "connectionId": conn_id,
            }),
        )
        .with_request_id(request_id.clone());
        self.unicast(conn_id, &registered);

        self.broadcast(&self.state_frame());
        self.send_stats(conn_id, request_id).await;
    }

    async fn handle_ack_unblock(
        &mut self,
        conn_id: ConnectionId,
        payload: AckUnblockPayload,
        request_id: Option<String>,
    ) {
        let key = (payload.agent_name.clone(), payload.task_id);
        self.cancel_reminder(&key);

        match self
            .deps
            .service
            .acknowledge_unblock(payload.task_id, &payload.agent_name)
            .await
        {
            Ok(Some(_)) => {
                // The service's injected agents.unblockAck and refreshed
                // summary fan out behind this command.
                let cap = self.deps.config.max_coordination_patterns;
                if let Some(state) = self.state.as_mut() {
                    state.record_pattern("unblock_ack", true, cap);
                }
                self.persist_state().await;
            }
            Ok(None) => {
                debug!(room_id = %self.room_id, task_id = %payload.task_id,
                       agent = %payload.agent_name, "ack for unknown blocker ignored");
            }
            Err(err) => self.reply_error(conn_id, err.to_string(), request_id),
        }
    }

    async fn handle_docs_query(
        &mut self,
        conn_id: ConnectionId,
        payload: DocsQueryPayload,
        request_id: Option<String>,
    ) {
        let query_cap = self.deps.config.max_query_history;
        let agent_name = self
            .connections
            .get(&conn_id)
            .and_then(|c| c.agent_name.clone());

        if let Some(state) = self.state.as_mut() {
            state.record_query(payload.query.clone(), payload.topic.clone(), query_cap);
            if let Some(agent) = &agent_name {
                let prefs = state.prefs_entry(agent);
                prefs.last_query = Some(payload.query.clone());
                if let Some(topic) = &payload.topic {
                    if !prefs.preferred_topics.contains(topic) {
                        prefs.preferred_topics.push(topic.clone());
                    }
                }
            }
        }
        self.persist_state().await;

        match self
            .deps
            .docs
            .query(&payload.query, payload.topic.as_deref(), None)
            .await
        {
            Ok(answer) => {
                let reply = Frame::new(
                    types::DOCS_QUERY_RESULT,
                    json!({
                        "query": payload.query,
                        "topic": payload.topic,
                        "answer": answer.answer,
                        "sources": answer.sources,
                        "confidence": answer.confidence,
                    }),
                )
                .with_request_id(request_id);
                self.unicast(conn_id, &reply);
            }
            Err(err) => {
                let reply = Frame::new(
                    types::DOCS_ERROR,
                    json!({ "query": payload.query, "message": err.to_string() }),
                )
                .with_request_id(request_id);
                self.unicast(conn_id, &reply);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Server-originated frames
    // -----------------------------------------------------------------------

    async fn on_inject(&mut self, frame: Frame) {
        self.broadcast(&frame);

        match frame.kind.as_str() {
            types::TASKS_BLOCKED => {
                self.broadcast_blocked_summary().await;
                if let Some(blocker) = frame.blocker() {
                    let prompt = Frame::new(
                        types::AGENTS_PROMPT_UPDATE,
                        json!({
                            "instruction": format!(
                                "Task {} is blocked ({}). Adjust your plan or resolve the blocker.",
                                blocker.task_id, blocker.reason
                            ),
                            "blocker": blocker,
                        }),
                    );
                    let target = blocker.blocked_agent.clone();
                    self.send_to_agent(&target, &prompt);
                }
            }
            types::TASKS_UNBLOCKED => {
                if let Some(blocker) = frame.blocker() {
                    let agent = frame
                        .notify_agent()
                        .unwrap_or(blocker.blocked_agent.as_str())
                        .to_string();
                    self.start_ack_reminder(agent, blocker).await;
                }
                self.broadcast_blocked_summary().await;
            }
            types::TASKS_BLOCKED_SUMMARY | types::AGENTS_ACTIVITY => {
                if !self.connections.is_empty() {
                    self.ensure_summary_timer();
                }
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Ack reminders
    // -----------------------------------------------------------------------

    async fn start_ack_reminder(&mut self, agent: String, block: TaskBlock) {
        let key = (agent.clone(), block.task_id);
        self.cancel_reminder(&key);

        if block.acked {
            // Already acknowledged; nothing to chase.
            return;
        }

        self.notify_unblocked(&agent, &block).await;

        let tx = self.tx.clone();
        let period = Duration::from_millis(self.deps.config.unblock_ping_interval_ms);
        let tick_agent = agent.clone();
        let task_id = block.task_id;
        let timer = tokio::spawn(async move {
            loop {
                sleep(period).await;
                let tick = RoomCommand::ReminderTick {
                    agent: tick_agent.clone(),
                    task_id,
                };
                if tx.send(tick).is_err() {
                    break;
                }
            }
        });

        debug!(room_id = %self.room_id, agent = %key.0, task_id = %key.1, "ack reminder started");
        self.reminders.insert(key, ReminderEntry { block, timer });
    }

    fn cancel_reminder(&mut self, key: &ReminderKey) {
        if let Some(entry) = self.reminders.remove(key) {
            entry.timer.abort();
            debug!(room_id = %self.room_id, agent = %key.0, task_id = %key.1, "ack reminder cancelled");
        }
    }

    async fn on_reminder_tick(&mut self, agent: String, task_id: Uuid) {
        let key = (agent, task_id);
        let Some(entry) = self.reminders.get(&key) else {
            // Cancelled after the tick was queued.
            return;
        };
        let block = entry.block.clone();

        // Re-read before acting: the ack may have landed through another
        // transport since this tick was scheduled.
        match self.retry_list_blocked(false).await {
            Ok(unacked) => {
                if !unacked.iter().any(|b| b.id == block.id) {
                    self.cancel_reminder(&key);
                    return;
                }
            }
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "reminder state check failed");
            }
        }

        self.notify_unblocked(&key.0, &block).await;
    }

    async fn notify_unblocked(&mut self, agent: &str, block: &TaskBlock) {
        if let Err(err) = self.deps.store.touch_block_last_notified(block.id).await {
            debug!(room_id = %self.room_id, block_id = %block.id, error = %err,
                   "failed to stamp last_notified");
        }
        let reminder = Frame::new(
            types::AGENTS_UNBLOCKED_REMINDER,
            json!({
                "blocker": block,
                "message": format!(
                    "Task {} has been unblocked. Send agents.ackUnblock to confirm.",
                    block.task_id
                ),
            }),
        );
        self.send_to_agent(agent, &reminder);
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn ensure_heartbeat_timer(&mut self) {
        if self.heartbeat.is_some() {
            return;
        }
        let tx = self.tx.clone();
        let period = Duration::from_millis(self.deps.config.heartbeat_interval_ms);
        self.heartbeat = Some(tokio::spawn(async move {
            loop {
                sleep(period).await;
                if tx.send(RoomCommand::HeartbeatTick).is_err() {
                    break;
                }
            }
        }));
    }

    fn ensure_summary_timer(&mut self) {
        if self.summary.is_some() {
            return;
        }
        let tx = self.tx.clone();
        let period = Duration::from_millis(self.deps.config.blocked_summary_interval_ms);
        self.summary = Some(tokio::spawn(async move {
            loop {
                sleep(period).await;
                if tx.send(RoomCommand::SummaryTick).is_err() {
                    break;
                }
            }
        }));
    }

    fn on_heartbeat_tick(&mut self) {
        if self.heartbeat.is_none() || self.connections.is_empty() {
            // Stale tick from an aborted timer.
            return;
        }
        let peers: Vec<String> = self
            .connections
            .values()
            .filter_map(|c| c.agent_name.clone())
            .collect();
        let frame = Frame::new(
            types::SYSTEM_HEARTBEAT,
            json!({ "ts": Utc::now(), "peers": peers }),
        );
        self.broadcast(&frame);
    }

    async fn on_summary_tick(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        self.broadcast_blocked_summary().await;
    }

    fn schedule_summary_refresh(&self) {
        let _ = self.tx.send(RoomCommand::SummaryTick);
    }

    // -----------------------------------------------------------------------
    // Outbound helpers
    // -----------------------------------------------------------------------

    fn broadcast(&self, frame: &Frame) {
        broadcast(self.connections.values(), frame);
    }

    fn unicast(&self, conn_id: ConnectionId, frame: &Frame) {
        match self.connections.get(&conn_id) {
            Some(conn) => {
                conn.send_frame(frame);
            }
            None => debug!(room_id = %self.room_id, %conn_id, "reply target already gone"),
        }
    }

    /// Directed send with broadcast fallback: when the named agent has no
    /// live connection everyone sees the frame so pending work stays
    /// visible.
    fn send_to_agent(&self, agent: &str, frame: &Frame) {
        let mut matched = false;
        for conn in self.connections.values() {
            if conn.agent_name.as_deref() == Some(agent) {
                conn.send_frame(frame);
                matched = true;
            }
        }
        if !matched {
            self.broadcast(frame);
        }
    }

    fn reply_error(&self, conn_id: ConnectionId, message: String, request_id: Option<String>) {
        warn!(room_id = %self.room_id, %conn_id, %message, "inbound frame handling failed");
        self.unicast(conn_id, &Frame::handler_error(message, request_id));
    }

    fn state_frame(&self) -> Frame {
        let peers: Vec<_> = self.connections.values().map(|c| c.peer_info()).collect();
        Frame::new(
            types::SYSTEM_STATE,
            json!({
                "roomId": self.room_id,
                "count": peers.len(),
                "peers": peers,
            }),
        )
    }

    async fn send_stats(&mut self, conn_id: ConnectionId, request_id: Option<String>) {
        let store = self.deps.store.clone();
        let counts = self
            .deps
            .retry
            .execute(|| {
                let store = store.clone();
                async move { store.task_counts().await }
            })
            .await;
        let activity = self
            .deps
            .retry
            .execute(|| {
                let store = store.clone();
                async move { store.list_agent_activity().await }
            })
            .await;
        let blockers = self.retry_list_blocked(false).await;

        match (counts, activity, blockers) {
            (Ok(counts), Ok(activity), Ok(blockers)) => {
                let frame = Frame::new(
                    types::TASKS_STATS,
                    json!({
                        "counts": counts,
                        "agentActivity": activity,
                        "blockers": blockers,
                    }),
                )
                .with_request_id(request_id);
                self.unicast(conn_id, &frame);
            }
            (counts, activity, blockers) => {
                let message = [counts.err(), activity.err(), blockers.err()]
                    .into_iter()
                    .flatten()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                self.reply_error(conn_id, message, request_id);
            }
        }
    }

    /// Fetch the unacked blockers and broadcast the summary. The list is
    /// read from the store immediately before the broadcast, so every
    /// summary reflects durably persisted state.
    async fn broadcast_blocked_summary(&mut self) {
        match self.retry_list_blocked(false).await {
            Ok(blockers) => {
                let frame = Frame::new(
                    types::TASKS_BLOCKED_SUMMARY,
                    json!({
                        "blockers": blockers,
                        "count": blockers.len(),
                        "ts": Utc::now(),
                    }),
                );
                self.broadcast(&frame);
            }
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "blocked summary fetch failed");
            }
        }
    }

    async fn retry_list_blocked(&self, include_acked: bool) -> StoreResult<Vec<TaskBlock>> {
        let store = self.deps.store.clone();
        self.deps
            .retry
            .execute(|| {
                let store = store.clone();
                async move { store.list_blocked_tasks(include_acked).await }
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Room state
    // -----------------------------------------------------------------------

    async fn load_or_init_state(&self) -> RoomState {
        match self.deps.room_store.load(&self.room_id).await {
            Ok(Some(state)) => state,
            Ok(None) => RoomState::new(&self.room_id),
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "room state load failed, starting fresh");
                RoomState::new(&self.room_id)
            }
        }
    }

    async fn persist_state(&mut self) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.last_activity = Utc::now();
        let snapshot = state.clone();
        if let Err(err) = self.deps.room_store.save(&snapshot).await {
            warn!(room_id = %self.room_id, error = %err, "room state save failed");
        }
    }
}
