//! lmchat: a local language-model chat session manager.
//!
//! The crate is organised around three parts:
//!
//! - [`session`] owns the engine lifecycle (select, load with progress,
//!   hand over between models, reset) and persists the chosen model.
//! - [`chat`] keeps the conversation and streams assistant replies into it.
//! - [`observe`] lets front-ends subscribe to changes and re-read snapshots.
//!
//! [`runtime::ChatRuntime`] wires them together. The binary puts a terminal
//! chat loop and an HTTP/SSE server on top.

pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod observe;
pub mod runtime;
pub mod server;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{Error, Result};
pub use runtime::ChatRuntime;
