//! Per-request execution context and session identity.

use serde::{Deserialize, Serialize};

use crate::Conversation;

/// Number of identity characters that take part in derived resource names.
pub const IDENTITY_PREFIX_LEN: usize = 12;

/// Default completion budget when a request does not specify one.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Stable key of a session: one caller identity talking to one agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    identity: String,
    agent: String,
}

impl SessionKey {
    #[must_use]
    pub fn new(identity: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            agent: agent.into(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Leading identity characters, reduced to `[a-z0-9]`.
    ///
    /// Keeps full credentials out of container names and logs.
    #[must_use]
    pub fn identity_prefix(&self) -> String {
        self.identity
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .take(IDENTITY_PREFIX_LEN)
            .collect()
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.agent, self.identity_prefix())
    }
}

/// Everything the core needs to stream one agent turn.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub agent_name: String,
    pub conversation: Conversation,
    pub max_tokens: u32,
    /// Caller identity token.
    pub identity: String,
}

impl StreamRequest {
    #[must_use]
    pub fn new(
        agent_name: impl Into<String>,
        conversation: Conversation,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            conversation,
            max_tokens: DEFAULT_MAX_TOKENS,
            identity: identity.into(),
        }
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.identity.clone(), self.agent_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        let a = SessionKey::new("tok-123", "echo");
        let b = SessionKey::new("tok-123", "echo");
        assert_eq!(a, b);
        assert_ne!(a, SessionKey::new("tok-123", "other"));
    }

    #[test]
    fn test_identity_prefix_is_sanitized_and_bounded() {
        let key = SessionKey::new("AB-cd_ef/0123456789abcdef", "echo");
        assert_eq!(key.identity_prefix(), "abcdef012345");
        assert_eq!(key.to_string(), "echo@abcdef012345");
    }

    #[test]
    fn test_request_key() {
        let request = StreamRequest::new("echo", Conversation::new(Vec::new()), "tok")
            .with_max_tokens(64);
        assert_eq!(request.max_tokens, 64);
        assert_eq!(request.session_key(), SessionKey::new("tok", "echo"));
    }
}
