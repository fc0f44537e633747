//! Database connection pool management.
//!
//! SQLite with WAL mode for concurrent readers, NORMAL synchronous, and a
//! busy timeout to ride out lock contention between rooms.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::{StoreError, StoreResult};

/// Database connection pool manager.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Create a new connection pool.
    ///
    /// `database_url` is a SQLite URL such as `sqlite:taskroom.db` or
    /// `sqlite::memory:`. The database file is created if missing.
    pub async fn new(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::fatal(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        // An in-memory database exists per connection; a pool of them would
        // be a pool of unrelated empty databases.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from)?;

        Ok(Self { pool })
    }

    /// Apply pending migrations. Safe to call repeatedly.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::fatal(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// The pool, for handing to store implementations.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool during shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_migrates_in_memory() {
        let db = DatabaseConnection::new("sqlite::memory:", 5)
            .await
            .expect("failed to create connection");
        db.migrate().await.expect("failed to run migrations");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '_sqlx%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .expect("failed to query tables");

        let names: Vec<String> = tables.into_iter().map(|t| t.0).collect();
        assert!(names.contains(&"tasks".to_string()));
        assert!(names.contains(&"task_blocks".to_string()));
        assert!(names.contains(&"agent_activity".to_string()));
        assert!(names.contains(&"room_states".to_string()));

        db.close().await;
    }
}
