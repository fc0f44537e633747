//! Room-state persistence port.
//!
//! The sidecar state is owned exclusively by the room actor; this port
//! exists so the actor can persist it. Implementations may be a no-op —
//! room durability is optional and losing it only costs history
//! continuity.

use async_trait::async_trait;

use crate::domain::errors::StoreResult;
use crate::domain::models::RoomState;

#[async_trait]
pub trait RoomStateStore: Send + Sync {
    async fn load(&self, room_id: &str) -> StoreResult<Option<RoomState>>;

    async fn save(&self, state: &RoomState) -> StoreResult<()>;
}

/// Discards room state. Used when per-room durability is not wanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRoomStateStore;

#[async_trait]
impl RoomStateStore for NullRoomStateStore {
    async fn load(&self, _room_id: &str) -> StoreResult<Option<RoomState>> {
        Ok(None)
    }

    async fn save(&self, _state: &RoomState) -> StoreResult<()> {
        Ok(())
    }
}
