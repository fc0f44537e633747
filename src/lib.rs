//! Taskroom: a real-time multi-agent coordination room server.
//!
//! Agents join a room over WebSocket, query and mutate a shared task
//! store, and are chased with reminders until they acknowledge unblocks.
//! Rooms are single-writer actors; every task mutation flows through the
//! write-through task service, which reflects it back into the owning room
//! over the HTTP `/broadcast` path.

pub mod domain;
pub mod infrastructure;
pub mod room;
pub mod server;
pub mod services;
