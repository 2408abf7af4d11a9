//! Client construction errors and reqwest error mapping.

use agent_chat_core::ApiError;
use thiserror::Error;

/// Error building an HTTP client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
    #[error("Base URL cannot carry a path: {0}")]
    InvalidBaseUrl(String),
}

/// Map a reqwest failure onto the backend error taxonomy.
pub(crate) fn api_error(err: &reqwest::Error) -> ApiError {
    if let Some(status) = err.status() {
        ApiError::Status(status.as_u16())
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Transport(err.to_string())
    }
}
