//! Domain ports: interfaces implemented by infrastructure.

pub mod docs_tool;
pub mod room_store;
pub mod task_store;

pub use docs_tool::{DocsAnswer, DocsTool, NullDocsTool};
pub use room_store::{NullRoomStateStore, RoomStateStore};
pub use task_store::{TaskFilter, TaskStore};
