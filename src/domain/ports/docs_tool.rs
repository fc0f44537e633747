//! AI docs collaborator port.
//!
//! Invoked by the `docs.query` handler. The core does not cache responses;
//! failures surface as `docs.error` frames.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Answer returned by the docs collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocsAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
    /// Confidence in [0, 1].
    #[serde(default)]
    pub confidence: f64,
}

#[async_trait]
pub trait DocsTool: Send + Sync {
    async fn query(
        &self,
        text: &str,
        topic: Option<&str>,
        max_results: Option<u32>,
    ) -> DomainResult<DocsAnswer>;
}

/// Stand-in used when no docs endpoint is configured. Every query fails
/// with [`DomainError::DocsUnavailable`], which the room surfaces as a
/// `docs.error` frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDocsTool;

#[async_trait]
impl DocsTool for NullDocsTool {
    async fn query(
        &self,
        _text: &str,
        _topic: Option<&str>,
        _max_results: Option<u32>,
    ) -> DomainResult<DocsAnswer> {
        Err(DomainError::DocsUnavailable)
    }
}
