//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::monitor::Monitor;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub monitor: Arc<Monitor>,
}

/// JSON API server for PortalWatch.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Store, monitor: Arc<Monitor>) -> Self {
        Self {
            config,
            state: AppState { store, monitor },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            // Portal CRUD
            .route("/api/portals", get(handlers::handle_list_portals))
            .route("/api/portals", post(handlers::handle_create_portal))
            .route("/api/portals/{id}", get(handlers::handle_get_portal))
            .route("/api/portals/{id}", put(handlers::handle_update_portal))
            .route("/api/portals/{id}", delete(handlers::handle_delete_portal))
            .route("/api/portals/{id}/purge", delete(handlers::handle_purge_portal))
            // On-demand checks and history
            .route("/api/portals/{id}/ping", get(handlers::handle_ping_portal))
            .route("/api/portals/{id}/responses", get(handlers::handle_list_responses))
            .route("/api/portals/{id}/alerts", get(handlers::handle_list_alerts))
            .route("/api/ping", post(handlers::handle_ping_definition))
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Serve until the shutdown future resolves.
    pub async fn start<F>(
        &self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.routes();

        tracing::info!("web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
