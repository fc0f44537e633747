//! Lazy per-room actor registry.
//!
//! Looking up a room spawns its actor on first use. Actors stay resident
//! for the life of the process: an idle actor is one mailbox and no timers,
//! and keeping it alive preserves ack-reminder schedules across agent
//! reconnects.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::room::actor::{spawn, RoomDeps, RoomHandle};

pub struct RoomRegistry {
    deps: RoomDeps,
    rooms: Mutex<HashMap<String, RoomHandle>>,
}

impl RoomRegistry {
    pub fn new(deps: RoomDeps) -> Self {
        Self { deps, rooms: Mutex::new(HashMap::new()) }
    }

    /// Mailbox handle for a room, spawning the actor if this is the room's
    /// first use.
    pub async fn handle(&self, room_id: &str) -> RoomHandle {
        let mut rooms = self.rooms.lock().await;
        if let Some(handle) = rooms.get(room_id) {
            return handle.clone();
        }
        info!(room_id, "spawning room actor");
        let handle = spawn(room_id.to_string(), self.deps.clone());
        rooms.insert(room_id.to_string(), handle.clone());
        handle
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Config, RoomConfig};
    use crate::domain::ports::{NullDocsTool, NullRoomStateStore, TaskStore};
    use crate::infrastructure::database::{DatabaseConnection, RetryPolicy, SqliteTaskStore};
    use crate::services::TaskService;

    #[tokio::test]
    async fn same_room_id_reuses_one_actor() {
        let db = DatabaseConnection::new("sqlite::memory:", 5).await.unwrap();
        db.migrate().await.unwrap();
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(db.pool().clone()));
        let service = Arc::new(TaskService::new(store.clone(), &Config::default()));
        let registry = RoomRegistry::new(RoomDeps {
            store,
            room_store: Arc::new(NullRoomStateStore),
            docs: Arc::new(NullDocsTool),
            service,
            config: RoomConfig::default(),
            retry: RetryPolicy::default(),
        });

        registry.handle("r1").await;
        registry.handle("r1").await;
        registry.handle("r2").await;
        assert_eq!(registry.room_count().await, 2);
    }
}
