//! Domain models.

pub mod agent;
pub mod blocker;
pub mod config;
pub mod frame;
pub mod room;
pub mod task;

pub use agent::{AgentActivity, AgentCheckIn, AgentStatus};
pub use blocker::{BlockSeverity, BlockTaskInput, TaskBlock, UnblockTaskInput};
pub use config::{
    Config, DatabaseConfig, DocsConfig, LoggingConfig, RetryConfig, RoomConfig, ServerConfig,
};
pub use frame::{Frame, TASKS_HANDLE_FAILED};
pub use room::{AgentPreferences, CoordinationPattern, QueryRecord, RoomState};
pub use task::{CreateTaskInput, StatusUpdate, Task, TaskCounts, TaskPriority, TaskStatus};
