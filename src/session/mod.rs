//! # Session Store
//!
//! Owns the engine lifecycle: model selection, load progress, handoff between
//! models, reset and the persisted selection.

pub mod catalog;
pub mod preferences;
mod store;

pub use catalog::{CatalogEntry, ModelCatalog};
pub use preferences::{FilePreferences, MemoryPreferences, PreferenceStore, SELECTED_MODEL_KEY};
pub use store::{Completion, Phase, SessionSnapshot, SessionStore};
