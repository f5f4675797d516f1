use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::engine::Role;

/// Stable message identifier.
pub type MessageId = String;

/// Lifecycle of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MessageStatus {
    /// Final; content never changes again.
    Complete,
    /// Open assistant message receiving deltas.
    Streaming,
    /// The stream broke; content holds whatever arrived before the error.
    Failed { error: String },
    /// The session or conversation was reset mid-stream.
    Interrupted,
}

/// One entry of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    /// A finished user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), MessageStatus::Complete)
    }

    /// An empty assistant message waiting for deltas.
    pub fn streaming_assistant() -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    fn new(role: Role, content: String, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            created_at: Utc::now(),
            status,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    /// Appends a delta. Ignored once the message is no longer streaming.
    pub(crate) fn push_delta(&mut self, delta: &str) -> bool {
        if !self.is_streaming() {
            return false;
        }
        self.content.push_str(delta);
        true
    }

    /// Moves a streaming message to a terminal status.
    pub(crate) fn close(&mut self, status: MessageStatus) {
        if self.is_streaming() {
            self.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_message_is_immutable() {
        let mut msg = Message::streaming_assistant();
        assert!(msg.push_delta("Hi"));
        msg.close(MessageStatus::Complete);
        assert!(!msg.push_delta(" there"));
        msg.close(MessageStatus::Interrupted);
        assert_eq!(msg.content, "Hi");
        assert_eq!(msg.status, MessageStatus::Complete);
    }

    #[test]
    fn test_user_messages_are_complete_with_unique_ids() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_eq!(a.role, Role::User);
        assert_eq!(a.status, MessageStatus::Complete);
        assert_ne!(a.id, b.id);
    }
}
