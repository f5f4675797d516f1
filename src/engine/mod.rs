//! # Engine Capability
//!
//! The inference engine is opaque to the rest of the crate. It is reached
//! through two traits:
//!
//! - [`EngineLoader`]: turns a model identifier into a live [`EngineHandle`],
//!   reporting progress along the way.
//! - [`EngineHandle`]: streams chat completions and releases its resources
//!   on `unload`.
//!
//! ## Backends
//!
//! - [`http::HttpEngineLoader`]: any OpenAI-compatible server running on the
//!   local machine (llama.cpp server, Ollama, LM Studio, ...).
//! - `llama::LlamaEngineLoader`: in-process llama.cpp, behind the `llama`
//!   feature.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::config::Settings;

pub mod http;
#[cfg(feature = "llama")]
pub mod llama;
pub mod sse;

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of the history sent to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Decoding parameters for a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub stream: bool,
}

/// A progress report emitted while a model loads.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    /// Completed fraction in `[0, 1]`.
    pub fraction: f32,
    /// Human-readable status line from the backend.
    pub text: String,
}

impl LoadProgress {
    pub fn new(fraction: f32, text: impl Into<String>) -> Self {
        Self {
            fraction,
            text: text.into(),
        }
    }
}

/// An incremental fragment of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub text: String,
}

impl Delta {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Progress callback handed to [`EngineLoader::load`]. May be called any
/// number of times, from any thread.
pub type ProgressFn = Arc<dyn Fn(LoadProgress) + Send + Sync>;

/// Stream of deltas, terminated by natural end-of-stream.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta, EngineError>> + Send>>;

/// Errors raised by engine backends.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("load failed: {0}")]
    Load(String),

    #[error("model not available: {0}")]
    ModelNotFound(String),

    #[error("completion request rejected: {0}")]
    Request(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("unload failed: {0}")]
    Unload(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Creates engines for model identifiers.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Loads `model_id`, calling `on_progress` as loading advances.
    async fn load(
        &self,
        model_id: &str,
        on_progress: ProgressFn,
    ) -> Result<Box<dyn EngineHandle>, EngineError>;
}

/// A live engine instance.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Releases the engine's resources.
    async fn unload(&self) -> Result<(), EngineError>;

    /// Opens a streaming chat completion over `history`.
    async fn complete(
        &self,
        history: Vec<ChatTurn>,
        options: CompletionOptions,
    ) -> Result<DeltaStream, EngineError>;
}

/// Builds the loader selected by `engine.backend`.
pub fn build_loader(settings: &Settings) -> anyhow::Result<Arc<dyn EngineLoader>> {
    match settings.engine.backend.as_str() {
        "http" => Ok(Arc::new(http::HttpEngineLoader::new(
            settings.engine.base_url.clone(),
        ))),
        #[cfg(feature = "llama")]
        "llama" => Ok(Arc::new(llama::LlamaEngineLoader::new(settings))),
        #[cfg(not(feature = "llama"))]
        "llama" => anyhow::bail!(
            "engine.backend = \"llama\" requires building with `--features llama`"
        ),
        other => anyhow::bail!("unknown engine backend: {}", other),
    }
}
