//! External collaborator operations invoked per bulk target.
//!
//! Source fetching, draft generation, and newsletter sending live outside
//! this service and are consumed through this narrow interface. The HTTP
//! implementation talks to the configured collaborator endpoints; tests
//! substitute stubs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::CollaboratorConfig;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} failed with status {status}: {detail}")]
    Upstream {
        operation: &'static str,
        status: u16,
        detail: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchOutcome {
    pub items_fetched: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftOutcome {
    pub draft_generated: bool,
    pub length: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendOutcome {
    pub recipient: String,
}

/// Per-workspace operations a bulk fan-out invokes.
#[async_trait]
pub trait WorkspaceOperations: Send + Sync {
    async fn fetch_sources(&self, workspace_id: Uuid) -> Result<FetchOutcome, CollaboratorError>;

    async fn generate_draft(&self, workspace_id: Uuid) -> Result<DraftOutcome, CollaboratorError>;

    async fn send_newsletter(&self, workspace_id: Uuid) -> Result<SendOutcome, CollaboratorError>;
}

/// HTTP client against the collaborator endpoints.
#[derive(Clone)]
pub struct HttpCollaborators {
    client: Client,
    base_url: String,
}

impl HttpCollaborators {
    pub fn new(config: &CollaboratorConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &'static str,
        workspace_id: Uuid,
        path: &str,
    ) -> Result<T, CollaboratorError> {
        let url = format!("{}/workspaces/{}/{}", self.base_url, workspace_id, path);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|source| CollaboratorError::Transport { operation, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| CollaboratorError::Transport { operation, source })?;

        if !status.is_success() {
            return Err(CollaboratorError::Upstream {
                operation,
                status: status.as_u16(),
                detail: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| CollaboratorError::Upstream {
            operation,
            status: status.as_u16(),
            detail: format!("unparseable response: {e}"),
        })
    }
}

#[async_trait]
impl WorkspaceOperations for HttpCollaborators {
    async fn fetch_sources(&self, workspace_id: Uuid) -> Result<FetchOutcome, CollaboratorError> {
        self.post("fetch_sources", workspace_id, "fetch").await
    }

    async fn generate_draft(&self, workspace_id: Uuid) -> Result<DraftOutcome, CollaboratorError> {
        self.post("generate_draft", workspace_id, "generate").await
    }

    async fn send_newsletter(&self, workspace_id: Uuid) -> Result<SendOutcome, CollaboratorError> {
        self.post("send_newsletter", workspace_id, "send").await
    }
}
