//! Thread view consumed by rendering layers.
//!
//! A plain mapping of the internal transcript: role, text, id and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::message::{Message, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for ThreadMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            role: message.role,
            content: vec![ContentPart::Text {
                text: message.content.clone(),
            }],
            created_at: message.created_at,
        }
    }
}

/// The whole thread plus whether a reply is being generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadView {
    pub messages: Vec<ThreadMessage>,
    pub is_running: bool,
}

pub fn to_thread(messages: &[Message]) -> Vec<ThreadMessage> {
    messages.iter().map(ThreadMessage::from).collect()
}
