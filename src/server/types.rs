use serde::{Deserialize, Serialize};

use crate::chat::Message;
use crate::observe::thread::ThreadView;
use crate::session::SessionSnapshot;

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Body of `select` and `initialize`
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

/// Returned once the reply has been opened; the text streams afterwards.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: String,
}

/// Body of `GET /messages`. `transcript` carries each message's status,
/// including the error of a reply that failed partway.
#[derive(Debug, Serialize)]
pub struct TranscriptView {
    #[serde(flatten)]
    pub thread: ThreadView,
    pub transcript: Vec<Message>,
}

/// Payload of every `state` event on the event stream
#[derive(Debug, Serialize)]
pub struct StateEvent {
    pub session: SessionSnapshot,
    #[serde(flatten)]
    pub conversation: TranscriptView,
}
