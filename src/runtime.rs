//! Wiring of the session store, the conversation and the change registry.
//!
//! [`ChatRuntime`] is what front-ends hold. It is cheap to clone and every
//! clone sees the same state.

use std::sync::Arc;

use crate::chat::{Conversation, GenerationConfig, Message, MessageId, PendingReply};
use crate::engine::EngineLoader;
use crate::error::Result;
use crate::observe::thread::{to_thread, ThreadView};
use crate::observe::{Subscribers, Subscription};
use crate::session::{PreferenceStore, SessionSnapshot, SessionStore};

#[derive(Clone)]
pub struct ChatRuntime {
    session: Arc<SessionStore>,
    conversation: Arc<Conversation>,
    subscribers: Arc<Subscribers>,
}

impl ChatRuntime {
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        preferences: Arc<dyn PreferenceStore>,
        generation: GenerationConfig,
    ) -> Self {
        let subscribers = Subscribers::new();
        let session = Arc::new(SessionStore::new(
            loader,
            preferences,
            Arc::clone(&subscribers),
        ));
        let conversation = Arc::new(Conversation::new(
            Arc::clone(&session),
            Arc::clone(&subscribers),
            generation,
        ));
        Self {
            session,
            conversation,
            subscribers,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.messages()
    }

    pub fn thread(&self) -> ThreadView {
        ThreadView {
            messages: to_thread(&self.conversation.messages()),
            is_running: self.conversation.is_running(),
        }
    }

    pub fn session(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.conversation.is_running()
    }

    /// Registers a change listener for both the session and the transcript.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub async fn send(&self, text: &str) -> Result<MessageId> {
        self.conversation.send(text).await
    }

    pub fn begin(&self, text: &str) -> Result<PendingReply> {
        self.conversation.begin(text)
    }

    pub async fn initialize(&self, model_id: &str) -> Result<()> {
        self.session.initialize(model_id).await
    }

    pub fn select_model(&self, model_id: &str) -> Result<()> {
        self.session.select_model(model_id)
    }

    /// Unloads the engine, forgets the selection and interrupts any reply.
    pub async fn reset(&self) {
        self.session.reset().await;
        self.conversation.interrupt();
    }

    pub fn clear(&self) {
        self.conversation.clear();
    }

    /// Releases the engine at process exit; the selection is kept.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
        self.conversation.interrupt();
    }
}
