//! Conversation model handed to agent launches.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Ordered, immutable sequence of messages.
///
/// Cloning is cheap; every clone shares the same messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Message>", into = "Vec<Message>")]
pub struct Conversation {
    messages: Arc<[Message]>,
}

impl Conversation {
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages: messages.into(),
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Serialize to the JSON array form embedded into entrypoints.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&*self.messages)
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

impl From<Conversation> for Vec<Message> {
    fn from(conversation: Conversation) -> Self {
        conversation.messages.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::new(Role::Assistant, "hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_conversation_is_plain_array() {
        let raw = r#"[{"role":"system","content":"be brief"},{"role":"user","content":"hello"}]"#;
        let conversation: Conversation = serde_json::from_str(raw).unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[1], Message::user("hello"));
        assert_eq!(conversation.to_json().unwrap(), raw);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let raw = r#"[{"role":"tool","content":"x"}]"#;
        assert!(serde_json::from_str::<Conversation>(raw).is_err());
    }
}
