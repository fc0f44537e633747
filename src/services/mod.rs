//! Service layer: the write-through task service and external collaborators.

pub mod docs_client;
pub mod signing;
pub mod task_service;

pub use docs_client::HttpDocsTool;
pub use task_service::TaskService;
