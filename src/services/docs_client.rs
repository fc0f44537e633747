//! HTTP client for the AI docs collaborator.
//!
//! The collaborator is an external service; this client only shapes the
//! request and maps failures to `docs.error` material. No caching.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{DocsAnswer, DocsTool};

/// Docs collaborator reached over HTTP POST.
#[derive(Clone)]
pub struct HttpDocsTool {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDocsTool {
    pub fn new(endpoint: impl Into<String>, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self { client, endpoint: endpoint.into() }
    }
}

#[async_trait]
impl DocsTool for HttpDocsTool {
    async fn query(
        &self,
        text: &str,
        topic: Option<&str>,
        max_results: Option<u32>,
    ) -> DomainResult<DocsAnswer> {
        let body = json!({
            "query": text,
            "topic": topic,
            "maxResults": max_results,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::DocsFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::DocsFailed(format!(
                "docs endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<DocsAnswer>()
            .await
            .map_err(|e| DomainError::DocsFailed(format!("bad docs response: {e}")))
    }
}
