// Conversation controller and the transcript it owns
mod conversation;
pub mod message;

// Interactive terminal front-end
mod cli;
mod display;

pub use cli::{chat_loop, initialize_with_progress};
pub use conversation::{Conversation, GenerationConfig, PendingReply, DEFAULT_SYSTEM_PROMPT};
pub use display::display_catalog;
pub use message::{Message, MessageId, MessageStatus};
