//! Error types for the chat session core.
//!
//! Nothing in here is fatal to the process: every variant is either a
//! rejected operation or a state transition the front-end presents.

use crate::engine::EngineError;
use crate::session::Phase;

/// Errors surfaced by the session store and the conversation controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The user message was empty after trimming.
    #[error("message is empty")]
    EmptyInput,

    /// No engine is loaded; the front-end should route back to model selection.
    #[error("engine is not ready")]
    EngineNotReady,

    /// A reply is already being generated.
    #[error("a reply is already being generated")]
    Busy,

    /// `initialize` was called while another load is pending.
    #[error("engine is already initializing model {model}")]
    AlreadyInitializing { model: String },

    /// The operation is only valid in another phase.
    #[error("operation requires phase {expected:?}, session is {actual:?}")]
    InvalidPhase { expected: Phase, actual: Phase },

    /// The engine capability failed to load the model.
    #[error("failed to load model {model}: {source}")]
    LoadFailure {
        model: String,
        #[source]
        source: EngineError,
    },

    /// A reset or a newer initialization replaced this load before it finished.
    #[error("initialization of {model} was superseded")]
    Superseded { model: String },

    /// The engine rejected a mediated call.
    #[error("engine error: {0}")]
    Engine(#[source] EngineError),

    /// The completion stream broke; partial content is kept on the message.
    #[error("reply {message_id} failed: {source}")]
    StreamFailure {
        message_id: String,
        #[source]
        source: EngineError,
    },

    /// The session or conversation was reset while the reply was streaming.
    #[error("reply {message_id} was interrupted")]
    Interrupted { message_id: String },
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;
