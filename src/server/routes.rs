use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    Json,
};
use futures::Stream;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::types::{
    ApiResponse, ModelRequest, SendMessageRequest, SendMessageResponse, StateEvent,
    TranscriptView,
};
use crate::error::Error;
use crate::observe::thread::{to_thread, ThreadView};
use crate::runtime::ChatRuntime;
use crate::session::{CatalogEntry, ModelCatalog, SessionSnapshot};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub runtime: ChatRuntime,
    pub catalog: Arc<ModelCatalog>,
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::EmptyInput => StatusCode::BAD_REQUEST,
        Error::EngineNotReady
        | Error::Busy
        | Error::AlreadyInitializing { .. }
        | Error::InvalidPhase { .. }
        | Error::Superseded { .. } => StatusCode::CONFLICT,
        Error::LoadFailure { .. }
        | Error::Engine(_)
        | Error::StreamFailure { .. }
        | Error::Interrupted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response<T: serde::Serialize>(error: Error) -> (StatusCode, Json<ApiResponse<T>>) {
    (status_for(&error), Json(ApiResponse::error(error.to_string())))
}

fn unknown_model<T: serde::Serialize>(model: &str) -> (StatusCode, Json<ApiResponse<T>>) {
    warn!("Unknown model requested: {}", model);
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(format!("Unknown model: {}", model))),
    )
}

/// Returns a health check response
pub async fn health_check() -> &'static str {
    debug!("Health check endpoint called");
    "lmchat is running!"
}

/// Returns the model catalog in configuration order.
pub async fn list_models(State(state): State<AppState>) -> Json<ApiResponse<Vec<CatalogEntry>>> {
    Json(ApiResponse::success(state.catalog.entries().to_vec()))
}

pub async fn get_session(State(state): State<AppState>) -> Json<ApiResponse<SessionSnapshot>> {
    Json(ApiResponse::success(state.runtime.session()))
}

/// Records the model to load later. Only valid while idle.
pub async fn select_model(
    State(state): State<AppState>,
    Json(request): Json<ModelRequest>,
) -> (StatusCode, Json<ApiResponse<SessionSnapshot>>) {
    info!("Select model endpoint called with model: {}", request.model);
    if state.catalog.get(&request.model).is_none() {
        return unknown_model(&request.model);
    }
    match state.runtime.select_model(&request.model) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success(state.runtime.session()))),
        Err(e) => error_response(e),
    }
}

/// Loads a model and waits until it is ready or has failed. Progress is
/// published on the event stream meanwhile.
pub async fn initialize(
    State(state): State<AppState>,
    Json(request): Json<ModelRequest>,
) -> (StatusCode, Json<ApiResponse<SessionSnapshot>>) {
    info!("Initialize endpoint called with model: {}", request.model);
    if state.catalog.get(&request.model).is_none() {
        return unknown_model(&request.model);
    }
    match state.runtime.initialize(&request.model).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success(state.runtime.session()))),
        Err(e) => {
            error!("Failed to initialize {}: {}", request.model, e);
            error_response(e)
        }
    }
}

pub async fn reset(State(state): State<AppState>) -> Json<ApiResponse<SessionSnapshot>> {
    info!("Reset endpoint called");
    state.runtime.reset().await;
    Json(ApiResponse::success(state.runtime.session()))
}

/// Thread view and statuses built from one read of the transcript.
fn transcript(runtime: &ChatRuntime) -> TranscriptView {
    let messages = runtime.messages();
    TranscriptView {
        thread: ThreadView {
            messages: to_thread(&messages),
            is_running: runtime.is_running(),
        },
        transcript: messages,
    }
}

pub async fn get_messages(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(transcript(&state.runtime)))
}

/// Appends the user message and streams the reply in a background task.
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> (StatusCode, Json<ApiResponse<SendMessageResponse>>) {
    let pending = match state.runtime.begin(&request.text) {
        Ok(pending) => pending,
        Err(e) => {
            warn!("Rejected message: {}", e);
            return error_response(e);
        }
    };

    let message_id = pending.message_id().to_string();
    info!(message = %message_id, "Streaming reply");
    tokio::spawn(async move {
        if let Err(e) = pending.run().await {
            error!("Reply did not complete: {}", e);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(SendMessageResponse { message_id })),
    )
}

pub async fn clear_messages(State(state): State<AppState>) -> Json<ApiResponse<()>> {
    info!("Clear messages endpoint called");
    state.runtime.clear();
    Json(ApiResponse {
        status: "success".to_string(),
        data: None,
        message: None,
    })
}

fn state_event(runtime: &ChatRuntime) -> Option<Event> {
    let payload = StateEvent {
        session: runtime.session(),
        conversation: transcript(runtime),
    };
    match Event::default().event("state").json_data(&payload) {
        Ok(event) => Some(event),
        Err(e) => {
            error!("Failed to serialize state event: {}", e);
            None
        }
    }
}

/// Server-Sent Events stream of `state` events.
///
/// Sends the current state once, then again after every change. Bursts of
/// notifications between two sends collapse into one event.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Event stream opened");
    let changed = Arc::new(Notify::new());
    let subscription = {
        let changed = Arc::clone(&changed);
        state.runtime.subscribe(move || changed.notify_one())
    };
    let runtime = state.runtime.clone();

    let stream = stream! {
        let _subscription = subscription;
        loop {
            if let Some(event) = state_event(&runtime) {
                yield Ok(event);
            }
            changed.notified().await;
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
