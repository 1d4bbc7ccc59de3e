//! Message types for chat-completion payloads

use serde::{Deserialize, Serialize};

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A chat message, serialized as `{"role": ..., "content": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_openai_shape() {
        let json = serde_json::to_value(Message::user("tomato soup")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"role": "user", "content": "tomato soup"})
        );
    }

    #[test]
    fn system_role_is_lowercase() {
        let json = serde_json::to_value(Message::system("You are a chef.")).unwrap();
        assert_eq!(json["role"], "system");
    }
}
