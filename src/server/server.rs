use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use super::routes::{self, AppState};
use crate::runtime::ChatRuntime;
use crate::session::ModelCatalog;

/// Builds the HTTP router over a runtime.
pub fn router(runtime: ChatRuntime, catalog: Arc<ModelCatalog>) -> Router {
    let state = AppState { runtime, catalog };

    Router::new()
        .route("/", get(routes::health_check))
        .route("/api/v1/models", get(routes::list_models))
        .route("/api/v1/session", get(routes::get_session))
        .route("/api/v1/session/select", post(routes::select_model))
        .route("/api/v1/session/initialize", post(routes::initialize))
        .route("/api/v1/session/reset", post(routes::reset))
        .route(
            "/api/v1/messages",
            get(routes::get_messages)
                .post(routes::send_message)
                .delete(routes::clear_messages),
        )
        .route("/api/v1/events", get(routes::events))
        .with_state(state)
}

/// HTTP front-end of a [`ChatRuntime`]
pub struct ApiServer {
    runtime: ChatRuntime,
    catalog: Arc<ModelCatalog>,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(runtime: ChatRuntime, catalog: Arc<ModelCatalog>, host: String, port: u16) -> Self {
        info!("Creating new API server on {}:{}", host, port);
        Self {
            runtime,
            catalog,
            host,
            port,
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        info!("Starting server on {}:{}", self.host, self.port);
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let app = router(self.runtime.clone(), Arc::clone(&self.catalog));
        info!("Server listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
