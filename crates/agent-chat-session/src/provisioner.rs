//! Session creation against the remote service.

use std::sync::Arc;

use agent_chat_core::{AgentId, ApiError, ChatConfig, CreateSessionRequest, SessionApi, SessionId};
use thiserror::Error;

/// Session creation errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to create session: status {0}")]
    SessionCreation(u16),
    #[error("Session creation response did not include an id")]
    MissingSessionId,
    #[error("Failed to create session: {0}")]
    Api(ApiError),
}

impl From<ApiError> for ProvisionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status(status) => Self::SessionCreation(status),
            other => Self::Api(other),
        }
    }
}

/// Creates sessions for the configured agent.
pub struct SessionProvisioner<A: ?Sized> {
    api: Arc<A>,
    agent_id: AgentId,
    title: String,
}

impl<A> SessionProvisioner<A>
where
    A: SessionApi + ?Sized,
{
    #[must_use]
    pub fn new(config: &ChatConfig, api: Arc<A>) -> Self {
        Self {
            api,
            agent_id: config.agent_id().clone(),
            title: config.session_title().to_owned(),
        }
    }

    #[must_use]
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Create a new session and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::SessionCreation`] with the status code on a
    /// non-success response, and [`ProvisionError::MissingSessionId`] when the
    /// response carries no usable identifier.
    pub async fn create_session(&self) -> Result<SessionId, ProvisionError> {
        let request = CreateSessionRequest {
            agent_id: self.agent_id.clone(),
            title: self.title.clone(),
        };

        let id = self
            .api
            .create_session(&request)
            .await
            .inspect_err(|e| tracing::error!("Session creation failed: {e}"))?
            .ok_or_else(|| {
                tracing::warn!("Session creation succeeded without an id");
                ProvisionError::MissingSessionId
            })?;

        tracing::info!(session = %id, agent = %self.agent_id, "Created session");
        Ok(id)
    }
}
