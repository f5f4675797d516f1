//! In-process GGUF backend built on `llama_cpp`.
//!
//! Models are resolved through the catalog: each entry names a GGUF file
//! under `models.directory`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use async_trait::async_trait;
use llama_cpp::standard_sampler::{SamplerStage, StandardSampler};
use llama_cpp::{LlamaModel, LlamaParams, SessionParams};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    ChatTurn, CompletionOptions, Delta, DeltaStream, EngineError, EngineHandle, EngineLoader,
    LoadProgress, ProgressFn,
};
use crate::config::Settings;
use crate::session::CatalogEntry;

const END_OF_TURN: &str = "<|im_end|>";

pub struct LlamaEngineLoader {
    directory: PathBuf,
    catalog: Vec<CatalogEntry>,
    context_size: u32,
    n_gpu_layers: u32,
}

impl LlamaEngineLoader {
    pub fn new(settings: &Settings) -> Self {
        Self {
            directory: settings.models.directory.clone(),
            catalog: settings.models.catalog.clone(),
            context_size: settings.inference.context_size as u32,
            n_gpu_layers: settings.inference.n_gpu_layers,
        }
    }

    fn model_path(&self, model_id: &str) -> Result<PathBuf, EngineError> {
        let entry = self
            .catalog
            .iter()
            .find(|entry| entry.id == model_id)
            .ok_or_else(|| EngineError::ModelNotFound(model_id.to_string()))?;
        let file = entry.file.as_deref().ok_or_else(|| {
            EngineError::ModelNotFound(format!("{} has no GGUF file configured", model_id))
        })?;
        let path = self.directory.join(file);
        if !path.is_file() {
            return Err(EngineError::ModelNotFound(path.display().to_string()));
        }
        Ok(path)
    }
}

#[async_trait]
impl EngineLoader for LlamaEngineLoader {
    async fn load(
        &self,
        model_id: &str,
        on_progress: ProgressFn,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        let path = self.model_path(model_id)?;
        on_progress(LoadProgress::new(0.0, format!("Loading {}", path.display())));

        let params = LlamaParams {
            n_gpu_layers: self.n_gpu_layers,
            ..Default::default()
        };
        info!(n_gpu_layers = self.n_gpu_layers, "Loading {} via llama_cpp", path.display());
        let model = tokio::task::spawn_blocking(move || LlamaModel::load_from_file(&path, params))
            .await
            .map_err(|e| EngineError::Load(e.to_string()))?
            .map_err(|e| EngineError::Load(e.to_string()))?;

        on_progress(LoadProgress::new(1.0, "Model loaded"));
        Ok(Box::new(LlamaEngine {
            model: Mutex::new(Some(model)),
            model_id: model_id.to_string(),
            context_size: self.context_size,
        }))
    }
}

pub struct LlamaEngine {
    model: Mutex<Option<LlamaModel>>,
    model_id: String,
    context_size: u32,
}

/// Renders the history in ChatML, ending with an open assistant turn.
fn render_prompt(history: &[ChatTurn]) -> String {
    let mut prompt = String::new();
    for turn in history {
        prompt.push_str("<|im_start|>");
        prompt.push_str(turn.role.as_str());
        prompt.push('\n');
        prompt.push_str(&turn.content);
        prompt.push_str(END_OF_TURN);
        prompt.push('\n');
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

/// Cuts generated text at the end-of-turn marker. Text that could be the
/// start of a marker split across pieces is held back until it resolves.
#[derive(Debug, Default)]
struct TurnCutter {
    pending: String,
}

impl TurnCutter {
    /// Returns the text that can be emitted and whether the turn ended.
    fn push(&mut self, piece: &str) -> (String, bool) {
        self.pending.push_str(piece);
        if let Some(at) = self.pending.find(END_OF_TURN) {
            self.pending.truncate(at);
            return (std::mem::take(&mut self.pending), true);
        }

        let len = self.pending.len();
        let held = (1..END_OF_TURN.len())
            .rev()
            .filter(|&n| n <= len && self.pending.is_char_boundary(len - n))
            .find(|&n| END_OF_TURN.starts_with(&self.pending[len - n..]))
            .unwrap_or(0);
        let rest = self.pending.split_off(len - held);
        (std::mem::replace(&mut self.pending, rest), false)
    }

    /// Text still held back when generation stops without a marker.
    fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

#[async_trait]
impl EngineHandle for LlamaEngine {
    async fn unload(&self) -> Result<(), EngineError> {
        let model = self.model.lock().unwrap_or_else(|e| e.into_inner()).take();
        if model.is_some() {
            info!("Released llama_cpp model {}", self.model_id);
        }
        Ok(())
    }

    async fn complete(
        &self,
        history: Vec<ChatTurn>,
        options: CompletionOptions,
    ) -> Result<DeltaStream, EngineError> {
        let model = self
            .model
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| EngineError::Request(format!("{} was unloaded", self.model_id)))?;

        let session_params = SessionParams {
            n_ctx: self.context_size,
            ..Default::default()
        };
        let prompt = render_prompt(&history);
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<String, EngineError>>();

        tokio::task::spawn_blocking(move || {
            let run = || -> Result<(), EngineError> {
                let mut session = model
                    .create_session(session_params)
                    .map_err(|e| EngineError::Request(e.to_string()))?;
                session
                    .advance_context(&prompt)
                    .map_err(|e| EngineError::Request(e.to_string()))?;

                let sampler = StandardSampler::new_softmax(
                    vec![SamplerStage::Temperature(options.temperature)],
                    1,
                );
                let handle = session
                    .start_completing_with(sampler, options.max_tokens)
                    .map_err(|e| EngineError::Stream(e.to_string()))?;

                let mut cutter = TurnCutter::default();
                for piece in handle.into_strings() {
                    let (text, ended) = cutter.push(&piece);
                    if !text.is_empty() && tx.send(Ok(text)).is_err() {
                        debug!("Completion receiver dropped; stopping generation");
                        return Ok(());
                    }
                    if ended {
                        return Ok(());
                    }
                }
                let rest = cutter.finish();
                if !rest.is_empty() {
                    let _ = tx.send(Ok(rest));
                }
                Ok(())
            };
            if let Err(e) = run() {
                warn!("llama_cpp completion failed: {}", e);
                let _ = tx.send(Err(e));
            }
        });

        Ok(Box::pin(stream! {
            while let Some(item) = rx.recv().await {
                yield item.map(Delta::new);
            }
        }))
    }
}
