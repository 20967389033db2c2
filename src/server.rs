/// Server setup and initialization
///
/// Wires together the executor registry, execution engine and HTTP routes.
/// Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_execution_routes, AppState},
    config::Config,
    executors::{ExecutorFactory, ExecutorRegistry},
    runtime::{ExecutionEngine, TracingSink},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
///
/// Builds the registry for the configured environment and one engine shared
/// by every request.
pub fn create_app(config: Config) -> Router {
    tracing::info!("🧰 Initializing executor registry ({} environment)", config.environment);
    let registry = Arc::new(ExecutorRegistry::from_config(&config));
    tracing::debug!("🧰 Registered node types: {:?}", registry.supported_node_types());

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(
        ExecutionEngine::new(registry.clone()).with_sink(Arc::new(TracingSink)),
    );

    let state = AppState {
        config: Arc::new(config),
        registry,
        engine,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Diagram execution API routes
        .merge(create_execution_routes().with_state(state))
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and serves it on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    tracing::info!("Starting diagrun server...");

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config);

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
