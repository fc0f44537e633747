//! Database infrastructure.
//!
//! SQLite via sqlx: connection pool with WAL mode, migrations, the task
//! store and room-state store implementations, and the retry policy for
//! transient failures.

pub mod connection;
pub mod retry;
pub mod room_store;
pub mod task_store;
pub mod utils;

pub use connection::DatabaseConnection;
pub use retry::RetryPolicy;
pub use room_store::SqliteRoomStateStore;
pub use task_store::SqliteTaskStore;
