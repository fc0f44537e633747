//! Room actors: per-room single-writer coordination state.

pub mod actor;
pub mod connection;
pub mod registry;

pub use actor::{RoomCommand, RoomDeps, RoomHandle};
pub use connection::{ConnectionHandle, ConnectionId, PeerInfo};
pub use registry::RoomRegistry;
