//! Deterministic engine double shared by unit and integration tests.
//!
//! [`ScriptedLoader`] records every call it receives and replays queued
//! replies, so tests can drive the session store and the conversation
//! controller without a real model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_stream::stream;
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::engine::{
    ChatTurn, CompletionOptions, Delta, DeltaStream, EngineError, EngineHandle, EngineLoader,
    LoadProgress, ProgressFn,
};

/// One step of a scripted reply.
#[derive(Debug, Clone)]
pub enum Step {
    /// Emit a delta.
    Delta(String),
    /// Emit a stream error and stop.
    Fail(String),
    /// Suspend until the notify is signalled.
    Wait(Arc<Notify>),
}

#[derive(Default)]
struct Script {
    progress: Mutex<Vec<f32>>,
    load_failures: Mutex<VecDeque<String>>,
    load_gate: Mutex<Option<Arc<Notify>>>,
    replies: Mutex<VecDeque<Vec<Step>>>,
    completion_failure: Mutex<Option<String>>,
    unload_failure: Mutex<Option<String>>,
    events: Mutex<Vec<String>>,
    requests: Mutex<Vec<(Vec<ChatTurn>, CompletionOptions)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted [`EngineLoader`]. Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedLoader {
    script: Arc<Script>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress fractions reported by every load.
    pub fn with_progress(self, steps: Vec<f32>) -> Self {
        *lock(&self.script.progress) = steps;
        self
    }

    pub fn fail_next_load(&self, message: &str) {
        lock(&self.script.load_failures).push_back(message.to_string());
    }

    /// Makes the next load wait until the returned notify is signalled.
    pub fn gate_next_load(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.script.load_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn push_reply(&self, steps: Vec<Step>) {
        lock(&self.script.replies).push_back(steps);
    }

    pub fn push_text_reply(&self, deltas: &[&str]) {
        self.push_reply(deltas.iter().map(|d| Step::Delta(d.to_string())).collect());
    }

    /// Makes the next `complete` call fail before any stream is opened.
    pub fn fail_next_completion(&self, message: &str) {
        *lock(&self.script.completion_failure) = Some(message.to_string());
    }

    pub fn fail_unloads(&self, message: &str) {
        *lock(&self.script.unload_failure) = Some(message.to_string());
    }

    /// Call log: `load:<id>`, `unload:<id>`, `complete:<id>`.
    pub fn events(&self) -> Vec<String> {
        lock(&self.script.events).clone()
    }

    pub fn loads(&self) -> usize {
        self.count("load:")
    }

    pub fn unloads(&self) -> usize {
        self.count("unload:")
    }

    /// Every history and option set passed to `complete`.
    pub fn requests(&self) -> Vec<(Vec<ChatTurn>, CompletionOptions)> {
        lock(&self.script.requests).clone()
    }

    fn count(&self, prefix: &str) -> usize {
        lock(&self.script.events)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn record(&self, event: String) {
        lock(&self.script.events).push(event);
    }
}

#[async_trait]
impl EngineLoader for ScriptedLoader {
    async fn load(
        &self,
        model_id: &str,
        on_progress: ProgressFn,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        self.record(format!("load:{}", model_id));

        let steps = lock(&self.script.progress).clone();
        for fraction in steps {
            on_progress(LoadProgress::new(
                fraction,
                format!("Loading {} ({:.0}%)", model_id, fraction * 100.0),
            ));
            tokio::task::yield_now().await;
        }

        let gate = lock(&self.script.load_gate).take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failure = lock(&self.script.load_failures).pop_front();
        if let Some(message) = failure {
            return Err(EngineError::Load(message));
        }

        Ok(Box::new(ScriptedEngine {
            loader: self.clone(),
            model: model_id.to_string(),
        }))
    }
}

struct ScriptedEngine {
    loader: ScriptedLoader,
    model: String,
}

#[async_trait]
impl EngineHandle for ScriptedEngine {
    async fn unload(&self) -> Result<(), EngineError> {
        self.loader.record(format!("unload:{}", self.model));
        match lock(&self.loader.script.unload_failure).clone() {
            Some(message) => Err(EngineError::Unload(message)),
            None => Ok(()),
        }
    }

    async fn complete(
        &self,
        history: Vec<ChatTurn>,
        options: CompletionOptions,
    ) -> Result<DeltaStream, EngineError> {
        self.loader.record(format!("complete:{}", self.model));
        lock(&self.loader.script.requests).push((history, options));

        let failure = lock(&self.loader.script.completion_failure).take();
        if let Some(message) = failure {
            return Err(EngineError::Request(message));
        }

        let steps = lock(&self.loader.script.replies)
            .pop_front()
            .unwrap_or_default();

        Ok(Box::pin(stream! {
            for step in steps {
                match step {
                    Step::Delta(text) => {
                        yield Ok(Delta::new(text));
                    }
                    Step::Fail(message) => {
                        yield Err(EngineError::Stream(message));
                        return;
                    }
                    Step::Wait(notify) => notify.notified().await,
                }
            }
        }))
    }
}
