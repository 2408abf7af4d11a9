//! Runtime configuration for the chat client.

use thiserror::Error;
use url::Url;

use crate::AgentId;

/// Environment variable holding the agent identifier (required).
pub const AGENT_ID_ENV: &str = "AGENT_CHAT_AGENT_ID";
/// Environment variable holding the backend base URL.
pub const API_URL_ENV: &str = "AGENT_CHAT_API_URL";
/// Environment variable overriding the title given to new sessions.
pub const SESSION_TITLE_ENV: &str = "AGENT_CHAT_SESSION_TITLE";

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_SESSION_TITLE: &str = "new session";

/// Configuration error. Fatal at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AGENT_CHAT_AGENT_ID environment variable is not set")]
    MissingAgentId,
    #[error("Invalid API base URL {url:?}: {reason}")]
    InvalidApiUrl { url: String, reason: String },
}

/// Client configuration.
///
/// A value of this type always carries an agent identifier, so anything
/// that holds one can provision sessions without further checks.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    agent_id: AgentId,
    api_base_url: Url,
    session_title: String,
}

impl ChatConfig {
    /// Create a configuration for the given agent with default endpoints.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingAgentId`] if the id is empty.
    pub fn new(agent_id: &str) -> Result<Self, ConfigError> {
        let agent_id = AgentId::parse(agent_id).ok_or(ConfigError::MissingAgentId)?;
        Ok(Self {
            agent_id,
            api_base_url: parse_base_url(DEFAULT_API_URL)?,
            session_title: DEFAULT_SESSION_TITLE.to_owned(),
        })
    }

    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if the agent id is missing or the base URL is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns error if the agent id is missing or the base URL is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let agent_id = lookup(AGENT_ID_ENV).ok_or(ConfigError::MissingAgentId)?;
        let mut config = Self::new(&agent_id)?;

        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            config = config.with_api_base_url(&url)?;
        }
        if let Some(title) = lookup(SESSION_TITLE_ENV).filter(|v| !v.trim().is_empty()) {
            config = config.with_session_title(title);
        }

        Ok(config)
    }

    /// Override the backend base URL.
    ///
    /// # Errors
    /// Returns error if the URL cannot be parsed or cannot carry a path.
    pub fn with_api_base_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.api_base_url = parse_base_url(url)?;
        Ok(self)
    }

    /// Override the title given to newly created sessions.
    #[must_use]
    pub fn with_session_title(mut self, title: impl Into<String>) -> Self {
        self.session_title = title.into();
        self
    }

    #[must_use]
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    #[must_use]
    pub const fn api_base_url(&self) -> &Url {
        &self.api_base_url
    }

    #[must_use]
    pub fn session_title(&self) -> &str {
        &self.session_title
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidApiUrl {
        url: raw.to_owned(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("URL cannot be a base".to_owned()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_agent_id_is_an_error() {
        assert!(matches!(
            ChatConfig::from_lookup(lookup(&[])),
            Err(ConfigError::MissingAgentId)
        ));
        assert!(matches!(
            ChatConfig::new("   "),
            Err(ConfigError::MissingAgentId)
        ));
    }

    #[test]
    fn test_defaults() {
        let config = ChatConfig::from_lookup(lookup(&[(AGENT_ID_ENV, "agent-1")])).unwrap();
        assert_eq!(config.agent_id().as_str(), "agent-1");
        assert_eq!(config.api_base_url().as_str(), "http://localhost:8080/");
        assert_eq!(config.session_title(), "new session");
    }

    #[test]
    fn test_overrides() {
        let config = ChatConfig::from_lookup(lookup(&[
            (AGENT_ID_ENV, "agent-1"),
            (API_URL_ENV, "https://chat.example.com/backend"),
            (SESSION_TITLE_ENV, "support"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url().path(), "/backend");
        assert_eq!(config.session_title(), "support");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = ChatConfig::new("agent-1")
            .unwrap()
            .with_api_base_url("not a url")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidApiUrl { .. }));
    }
}
