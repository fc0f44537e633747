//! SQLite implementation of room-state persistence.
//!
//! Preferences, query history, and coordination patterns are stored as JSON
//! text; only the owning room actor ever touches a row.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::RoomState;
use crate::domain::ports::RoomStateStore;
use crate::infrastructure::database::utils::{fmt_ts, parse_ts};

/// SQLite-backed [`RoomStateStore`].
#[derive(Clone)]
pub struct SqliteRoomStateStore {
    pool: SqlitePool,
}

impl SqliteRoomStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomStateStore for SqliteRoomStateStore {
    async fn load(&self, room_id: &str) -> StoreResult<Option<RoomState>> {
        let row = sqlx::query("SELECT * FROM room_states WHERE room_id = ?")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let preferences: String = row.try_get("preferences").map_err(StoreError::from)?;
        let query_history: String = row.try_get("query_history").map_err(StoreError::from)?;
        let patterns: String = row.try_get("coordination_patterns").map_err(StoreError::from)?;

        Ok(Some(RoomState {
            room_id: row.try_get("room_id").map_err(StoreError::from)?,
            created_at: parse_ts(&row.try_get::<String, _>("created_at").map_err(StoreError::from)?)?,
            last_activity: parse_ts(
                &row.try_get::<String, _>("last_activity").map_err(StoreError::from)?,
            )?,
            preferences: serde_json::from_str(&preferences)?,
            query_history: serde_json::from_str(&query_history)?,
            coordination_patterns: serde_json::from_str(&patterns)?,
        }))
    }

    async fn save(&self, state: &RoomState) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO room_states (
                room_id, created_at, last_activity, preferences, query_history, coordination_patterns
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(room_id) DO UPDATE SET
                last_activity = excluded.last_activity,
                preferences = excluded.preferences,
                query_history = excluded.query_history,
                coordination_patterns = excluded.coordination_patterns
            "#,
        )
        .bind(&state.room_id)
        .bind(fmt_ts(state.created_at))
        .bind(fmt_ts(state.last_activity))
        .bind(serde_json::to_string(&state.preferences)?)
        .bind(serde_json::to_string(&state.query_history)?)
        .bind(serde_json::to_string(&state.coordination_patterns)?)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }
}
