use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::message::{Message, MessageId, MessageStatus, Role};
use crate::config::InferenceConfig;
use crate::engine::{ChatTurn, CompletionOptions};
use crate::error::{Error, Result};
use crate::observe::Subscribers;
use crate::session::SessionStore;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Sampling parameters and preamble, fixed when the conversation is built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: usize,
    pub system_prompt: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl From<&InferenceConfig> for GenerationConfig {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
        }
    }
}

impl GenerationConfig {
    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        }
    }
}

#[derive(Default)]
struct ConversationState {
    messages: Vec<Message>,
    in_flight: Option<MessageId>,
    /// Bumped by `clear`; replies opened under an older epoch are dropped.
    epoch: u64,
}

/// Ordered transcript plus the single in-flight assistant reply.
pub struct Conversation {
    state: Mutex<ConversationState>,
    session: Arc<SessionStore>,
    subscribers: Arc<Subscribers>,
    generation: GenerationConfig,
}

impl Conversation {
    pub fn new(
        session: Arc<SessionStore>,
        subscribers: Arc<Subscribers>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            state: Mutex::new(ConversationState::default()),
            session,
            subscribers,
            generation,
        }
    }

    fn state(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn generation(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Copy of the transcript in insertion order.
    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state().in_flight.is_some()
    }

    /// Sends `text` and streams the reply to completion.
    pub async fn send(self: &Arc<Self>, text: &str) -> Result<MessageId> {
        self.begin(text)?.run().await
    }

    /// Appends the user message and an empty streaming reply.
    ///
    /// The returned [`PendingReply`] owns the busy flag: run it to stream
    /// the reply, or drop it to abandon the reply as interrupted.
    pub fn begin(self: &Arc<Self>, text: &str) -> Result<PendingReply> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }
        if !self.session.is_ready() {
            return Err(Error::EngineNotReady);
        }

        let pending = {
            let mut state = self.state();
            if state.in_flight.is_some() {
                return Err(Error::Busy);
            }

            let user = Message::user(text);
            let mut history = Vec::with_capacity(state.messages.len() + 2);
            history.push(ChatTurn::new(Role::System, self.generation.system_prompt.clone()));
            history.extend(
                state
                    .messages
                    .iter()
                    .filter(|m| !m.content.is_empty())
                    .map(|m| ChatTurn::new(m.role, m.content.clone())),
            );
            history.push(ChatTurn::new(Role::User, user.content.clone()));

            let reply = Message::streaming_assistant();
            let message_id = reply.id.clone();
            state.messages.push(user);
            state.messages.push(reply);
            state.in_flight = Some(message_id.clone());

            PendingReply {
                conversation: Arc::clone(self),
                message_id,
                history,
                epoch: state.epoch,
                finished: false,
            }
        };

        debug!(message = %pending.message_id, "Reply started");
        self.subscribers.notify();
        Ok(pending)
    }

    /// Drops the transcript, abandoning any in-flight reply.
    pub fn clear(&self) {
        {
            let mut state = self.state();
            state.epoch += 1;
            state.messages.clear();
            state.in_flight = None;
        }
        info!("Conversation cleared");
        self.subscribers.notify();
    }

    /// Marks the in-flight reply as interrupted and releases the busy flag.
    pub fn interrupt(&self) {
        let interrupted = {
            let mut state = self.state();
            match state.in_flight.take() {
                Some(id) => {
                    if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
                        message.close(MessageStatus::Interrupted);
                    }
                    Some(id)
                }
                None => None,
            }
        };
        if let Some(id) = interrupted {
            info!(message = %id, "Reply interrupted");
            self.subscribers.notify();
        }
    }

    /// Appends a delta to the open reply. False once the reply is closed
    /// or the conversation was cleared.
    fn append(&self, id: &str, epoch: u64, delta: &str) -> bool {
        let appended = {
            let mut state = self.state();
            if state.epoch != epoch {
                false
            } else {
                state
                    .messages
                    .iter_mut()
                    .find(|m| m.id == id)
                    .map(|m| m.push_delta(delta))
                    .unwrap_or(false)
            }
        };
        if appended {
            self.subscribers.notify();
        }
        appended
    }

    fn finish(&self, id: &str, epoch: u64, status: MessageStatus) {
        {
            let mut state = self.state();
            if state.epoch != epoch {
                return;
            }
            if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
                message.close(status);
            }
            if state.in_flight.as_deref() == Some(id) {
                state.in_flight = None;
            }
        }
        self.subscribers.notify();
    }
}

/// An assistant reply that has been appended but not yet streamed.
#[must_use = "dropping a PendingReply interrupts the reply"]
pub struct PendingReply {
    conversation: Arc<Conversation>,
    message_id: MessageId,
    history: Vec<ChatTurn>,
    epoch: u64,
    finished: bool,
}

impl PendingReply {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Full prompt sent to the engine: preamble, prior turns, new user turn.
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Streams the reply into the open message until the engine finishes.
    pub async fn run(mut self) -> Result<MessageId> {
        let conversation = Arc::clone(&self.conversation);
        let history = std::mem::take(&mut self.history);
        let options = conversation.generation.options();

        let completion = match conversation.session.complete(history, options).await {
            Ok(completion) => completion,
            Err(Error::Engine(source)) => {
                warn!(message = %self.message_id, "Failed to open completion: {}", source);
                self.close(MessageStatus::Failed {
                    error: source.to_string(),
                });
                return Err(Error::StreamFailure {
                    message_id: self.message_id.clone(),
                    source,
                });
            }
            Err(e) => {
                debug!(message = %self.message_id, "Session went away before streaming: {}", e);
                return Err(self.interrupted());
            }
        };

        let mut stream = completion.stream;
        while let Some(item) = stream.next().await {
            if !conversation.session.is_current(completion.epoch) {
                return Err(self.interrupted());
            }
            match item {
                Ok(delta) => {
                    if delta.text.is_empty() {
                        continue;
                    }
                    if !conversation.append(&self.message_id, self.epoch, &delta.text) {
                        return Err(self.interrupted());
                    }
                }
                Err(source) => {
                    warn!(message = %self.message_id, "Reply stream failed: {}", source);
                    self.close(MessageStatus::Failed {
                        error: source.to_string(),
                    });
                    return Err(Error::StreamFailure {
                        message_id: self.message_id.clone(),
                        source,
                    });
                }
            }
        }

        if !conversation.session.is_current(completion.epoch) {
            return Err(self.interrupted());
        }
        self.close(MessageStatus::Complete);
        debug!(message = %self.message_id, "Reply complete");
        Ok(self.message_id.clone())
    }

    fn interrupted(&mut self) -> Error {
        self.close(MessageStatus::Interrupted);
        Error::Interrupted {
            message_id: self.message_id.clone(),
        }
    }

    fn close(&mut self, status: MessageStatus) {
        if !self.finished {
            self.finished = true;
            self.conversation.finish(&self.message_id, self.epoch, status);
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.close(MessageStatus::Interrupted);
    }
}
