use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use super::preferences::{PreferenceStore, SELECTED_MODEL_KEY};
use crate::engine::{
    ChatTurn, CompletionOptions, DeltaStream, EngineHandle, EngineLoader, LoadProgress, ProgressFn,
};
use crate::error::{Error, Result};
use crate::observe::Subscribers;

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Initializing,
    Ready,
    Failed,
}

/// Point-in-time copy of the session state. Never exposes the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// Load progress of the current attempt, in `[0, 1]`.
    pub progress: f32,
    /// Last status line reported by the loader.
    pub progress_text: Option<String>,
    pub selected_model: Option<String>,
    /// Model the live engine was loaded with.
    pub loaded_model: Option<String>,
    pub engine_loaded: bool,
    /// Reason of the last failed load.
    pub last_error: Option<String>,
    /// Bumped on every initialization attempt, reset and shutdown.
    pub epoch: u64,
}

impl SessionSnapshot {
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }
}

/// A completion opened through the store.
pub struct Completion {
    pub stream: DeltaStream,
    /// Session epoch the stream belongs to; see [`SessionStore::is_current`].
    pub epoch: u64,
}

struct SessionState {
    engine: Option<Arc<dyn EngineHandle>>,
    phase: Phase,
    progress: f32,
    progress_text: Option<String>,
    selected_model: Option<String>,
    loaded_model: Option<String>,
    last_error: Option<String>,
    epoch: u64,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            progress: self.progress,
            progress_text: self.progress_text.clone(),
            selected_model: self.selected_model.clone(),
            loaded_model: self.loaded_model.clone(),
            engine_loaded: self.engine.is_some(),
            last_error: self.last_error.clone(),
            epoch: self.epoch,
        }
    }

    /// Removes the engine and returns it with the model it was loaded for.
    fn take_engine(&mut self) -> Option<(String, Arc<dyn EngineHandle>)> {
        let model = self.loaded_model.take().unwrap_or_default();
        self.engine.take().map(|engine| (model, engine))
    }

    fn to_idle(&mut self) {
        self.epoch += 1;
        self.phase = Phase::Idle;
        self.progress = 0.0;
        self.progress_text = None;
        self.last_error = None;
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owner of the single engine instance of the process.
///
/// The store drives the `Idle -> Initializing -> Ready | Failed` lifecycle,
/// hands the engine over between models (old engine unloaded before the new
/// one loads), and notifies subscribers after every committed change.
///
/// Every engine load and unload runs under `handoff`, so a load never
/// starts while another load is outstanding or an old engine is still
/// being released.
pub struct SessionStore {
    state: Arc<Mutex<SessionState>>,
    handoff: AsyncMutex<()>,
    loader: Arc<dyn EngineLoader>,
    preferences: Arc<dyn PreferenceStore>,
    subscribers: Arc<Subscribers>,
}

impl SessionStore {
    /// Creates an idle store, restoring the persisted model selection.
    pub fn new(
        loader: Arc<dyn EngineLoader>,
        preferences: Arc<dyn PreferenceStore>,
        subscribers: Arc<Subscribers>,
    ) -> Self {
        let selected_model = match preferences.get(SELECTED_MODEL_KEY) {
            Ok(model) => model,
            Err(e) => {
                warn!("Failed to read persisted model selection: {}", e);
                None
            }
        };
        if let Some(model) = &selected_model {
            info!("Restored model selection: {}", model);
        }

        Self {
            state: Arc::new(Mutex::new(SessionState {
                engine: None,
                phase: Phase::Idle,
                progress: 0.0,
                progress_text: None,
                selected_model,
                loaded_model: None,
                last_error: None,
                epoch: 0,
            })),
            handoff: AsyncMutex::new(()),
            loader,
            preferences,
            subscribers,
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state().snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Ready
    }

    /// True while `epoch` is still the live, ready session.
    pub fn is_current(&self, epoch: u64) -> bool {
        let state = self.state();
        state.epoch == epoch && state.phase == Phase::Ready
    }

    /// Records the model to use without loading it. Only valid while idle.
    pub fn select_model(&self, model_id: &str) -> Result<()> {
        {
            let mut state = self.state();
            if state.phase != Phase::Idle {
                return Err(Error::InvalidPhase {
                    expected: Phase::Idle,
                    actual: state.phase,
                });
            }
            state.selected_model = Some(model_id.to_string());
        }
        self.persist_selection(model_id);
        info!("Selected model {}", model_id);
        self.subscribers.notify();
        Ok(())
    }

    /// Loads `model_id`, replacing any engine held for another model.
    ///
    /// Returns immediately if that model is already loaded. Fails with
    /// [`Error::AlreadyInitializing`] while another load is pending.
    pub async fn initialize(&self, model_id: &str) -> Result<()> {
        let (attempt, previous) = {
            let mut state = self.state();
            match state.phase {
                Phase::Initializing => {
                    return Err(Error::AlreadyInitializing {
                        model: state.selected_model.clone().unwrap_or_default(),
                    });
                }
                Phase::Ready if state.loaded_model.as_deref() == Some(model_id) => {
                    debug!("Model {} already loaded", model_id);
                    return Ok(());
                }
                _ => {}
            }

            let previous = state.take_engine();
            state.epoch += 1;
            state.phase = Phase::Initializing;
            state.progress = 0.0;
            state.progress_text = None;
            state.last_error = None;
            state.selected_model = Some(model_id.to_string());
            (state.epoch, previous)
        };
        self.persist_selection(model_id);
        self.subscribers.notify();
        info!(model = model_id, attempt, "Initializing engine");

        let _handoff = self.handoff.lock().await;
        if let Some((old_model, engine)) = previous {
            info!("Unloading {} before loading {}", old_model, model_id);
            if let Err(e) = engine.unload().await {
                warn!("Failed to unload {}: {}", old_model, e);
            }
        }

        // A reset may have landed while an earlier handoff was settling.
        if self.state().epoch != attempt {
            debug!(model = model_id, attempt, "Load superseded before it started");
            return Err(Error::Superseded {
                model: model_id.to_string(),
            });
        }

        match self.loader.load(model_id, self.progress_callback(attempt)).await {
            Ok(engine) => {
                let engine: Arc<dyn EngineHandle> = Arc::from(engine);
                let installed = {
                    let mut state = self.state();
                    if state.epoch == attempt {
                        state.engine = Some(Arc::clone(&engine));
                        state.loaded_model = Some(model_id.to_string());
                        state.phase = Phase::Ready;
                        state.progress = 1.0;
                        true
                    } else {
                        false
                    }
                };

                if !installed {
                    warn!("Load of {} finished after it was superseded; releasing it", model_id);
                    if let Err(e) = engine.unload().await {
                        warn!("Failed to unload superseded engine {}: {}", model_id, e);
                    }
                    return Err(Error::Superseded {
                        model: model_id.to_string(),
                    });
                }

                info!("Engine ready with {}", model_id);
                self.subscribers.notify();
                Ok(())
            }
            Err(source) => {
                error!("Failed to load {}: {}", model_id, source);
                let current = {
                    let mut state = self.state();
                    if state.epoch == attempt {
                        state.phase = Phase::Failed;
                        state.last_error = Some(source.to_string());
                        true
                    } else {
                        false
                    }
                };

                if !current {
                    return Err(Error::Superseded {
                        model: model_id.to_string(),
                    });
                }
                self.subscribers.notify();
                Err(Error::LoadFailure {
                    model: model_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Unloads the engine and forgets the model selection. Always succeeds.
    pub async fn reset(&self) {
        let previous = {
            let mut state = self.state();
            let previous = state.take_engine();
            state.to_idle();
            state.selected_model = None;
            previous
        };
        if let Err(e) = self.preferences.delete(SELECTED_MODEL_KEY) {
            warn!("Failed to clear persisted model selection: {}", e);
        }
        self.release(previous).await;
        info!("Session reset");
        self.subscribers.notify();
    }

    /// Unloads the engine but keeps the persisted selection, so the next
    /// run can pick up where this one stopped.
    pub async fn shutdown(&self) {
        let previous = {
            let mut state = self.state();
            let previous = state.take_engine();
            state.to_idle();
            previous
        };
        self.release(previous).await;
        info!("Session shut down");
        self.subscribers.notify();
    }

    /// Opens a streaming completion on the live engine.
    pub async fn complete(
        &self,
        history: Vec<ChatTurn>,
        options: CompletionOptions,
    ) -> Result<Completion> {
        let (engine, epoch) = {
            let state = self.state();
            match (&state.engine, state.phase) {
                (Some(engine), Phase::Ready) => (Arc::clone(engine), state.epoch),
                _ => return Err(Error::EngineNotReady),
            }
        };

        let stream = engine
            .complete(history, options)
            .await
            .map_err(Error::Engine)?;
        Ok(Completion { stream, epoch })
    }

    /// Unloads a taken engine. A load in flight holds no engine, so reset
    /// during a load returns at once and the load releases its own result.
    async fn release(&self, previous: Option<(String, Arc<dyn EngineHandle>)>) {
        if let Some((model, engine)) = previous {
            let _handoff = self.handoff.lock().await;
            info!("Unloading {}", model);
            if let Err(e) = engine.unload().await {
                warn!("Failed to unload {}: {}", model, e);
            }
        }
    }

    fn persist_selection(&self, model_id: &str) {
        if let Err(e) = self.preferences.set(SELECTED_MODEL_KEY, model_id) {
            warn!("Failed to persist model selection {}: {}", model_id, e);
        }
    }

    /// Progress sink for one load attempt. Reports from superseded attempts
    /// are dropped; progress never moves backwards within an attempt.
    fn progress_callback(&self, attempt: u64) -> ProgressFn {
        let state = Arc::clone(&self.state);
        let subscribers = Arc::clone(&self.subscribers);
        Arc::new(move |report: LoadProgress| {
            let progress = {
                let mut state = lock(&state);
                if state.epoch != attempt || state.phase != Phase::Initializing {
                    return;
                }
                if report.fraction.is_finite() {
                    state.progress = state.progress.max(report.fraction.clamp(0.0, 1.0));
                }
                state.progress_text = Some(report.text);
                state.progress
            };
            debug!(attempt, progress, "Load progress");
            subscribers.notify();
        })
    }
}
