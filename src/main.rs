//! Portfolio chat - backend for an embeddable assistant widget
//!
//! Each mounted widget is a session driven by a pure state machine. The
//! transcript lives in a key-value store and every reply comes from a hosted
//! text-generation endpoint.

mod api;
mod config;
mod conversation;
mod db;
mod format;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use llm::{CohereService, LlmService, LoggingService};
use runtime::{SessionConfig, SessionManager};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portfolio_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(
        path = %config.db_path.display(),
        quota_bytes = config.storage_quota_bytes,
        "Opening database"
    );
    let db = Database::open(&config.db_path)?.with_quota(config.storage_quota_bytes);

    // Without a key every request fails and the widget shows its fallback reply
    let api_key = config.llm.api_key.clone().unwrap_or_else(|| {
        tracing::warn!("COHERE_API_KEY is not set, completions will fail");
        String::new()
    });
    let cohere = CohereService::new(api_key, &config.llm.endpoint, &config.llm.model)?;
    let llm: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(cohere)));
    tracing::info!(model = %llm.model_id(), endpoint = %config.llm.endpoint, "Text generation configured");

    let sessions = Arc::new(SessionManager::new(
        Arc::new(db),
        llm,
        SessionConfig::new(&config.llm, &config.widget),
        config.widget.storage_key_prefix.clone(),
    ));
    sessions.spawn_reaper(config.session_idle_timeout);
    tracing::info!(idle_secs = config.session_idle_timeout.as_secs(), "Idle session reaper started");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(AppState::new(sessions.clone()))
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Portfolio chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
