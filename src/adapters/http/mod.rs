//! Combined REST + `/ws` observer HTTP surface (spec §6). Reuses the
//! `WorkerContext` the queue consumers already run against as axum
//! `State`, so both surfaces read and mutate the same sprint records.

pub mod actions;
pub mod error;
pub mod rest;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::services::workers::WorkerContext;

/// HTTP server built around a [`WorkerContext`] the orchestrator
/// already constructed for its queue consumers.
pub struct Server {
    ctx: Arc<WorkerContext>,
    enable_cors: bool,
}

impl Server {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx, enable_cors: true }
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/api/sprints", get(rest::list_sprints).post(rest::create_sprint))
            .route("/api/sprints/{id}", get(rest::get_sprint))
            .route("/api/sprints/{id}/start", post(rest::start_sprint))
            .route("/api/sprints/{id}/approve", post(rest::approve_sprint))
            .route("/api/sprints/{id}/pause", post(rest::pause_sprint))
            .route("/api/sprints/{id}/resume", post(rest::resume_sprint))
            .route("/api/sprints/{id}/cancel", post(rest::cancel_sprint))
            .route("/api/sprints/{id}/restart", post(rest::restart_sprint))
            .route("/api/sprints/{id}/complete", post(rest::complete_sprint))
            .route("/api/sprints/{id}/merge-local", post(rest::merge_local_sprint))
            .route("/api/sprints/{id}/spec", get(rest::get_spec))
            .route("/api/sprints/{id}/logs", get(rest::get_logs))
            .route("/api/tasks/{sprint_id}/{task_id}/retry", post(rest::retry_task))
            .route("/api/system/browse", get(rest::browse_filesystem))
            .route("/ws", get(ws::ws_handler))
            .with_state(self.ctx.clone())
            .layer(TraceLayer::new_for_http());

        if self.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
        }

        router
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.ctx.config.server.host, self.ctx.config.server.port).parse()?;
        let router = self.build_router();
        tracing::info!(%addr, "http surface listening");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }

    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.ctx.config.server.host, self.ctx.config.server.port).parse()?;
        let router = self.build_router();
        tracing::info!(%addr, "http surface listening");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
        Ok(())
    }
}
