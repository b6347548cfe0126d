//! Firewall console server.
//!
//! Serves browser terminals over WebSocket and runs the interface poller.
//!
//! Run with: `FWCONSOLE_CONFIG=fwconsole.toml cargo run -p fwconsole-server`
//!
//! Then open http://localhost:3000/?target=<id>&token=<token> in your browser.

mod auth;
mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Html,
    routing::get,
};
use fwconsole_core::{
    AlertId, AlertStore, SessionRecord, SessionRecordStore, TargetResolver,
    storage::{MemoryAlertStore, MemorySessionRecords, MemoryTargetDirectory},
};
use fwconsole_gateway::{GatewayState, router as terminal_router};
use fwconsole_monitor::{LogNotifier, PollStatus, Scheduler};
use fwconsole_ssh::SshConnector;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{auth::StaticTokens, config::ServerConfig};

/// State for the status endpoints.
#[derive(Clone)]
struct ApiState {
    scheduler: Arc<Scheduler>,
    records: Arc<MemorySessionRecords>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::load()?;

    let directory = Arc::new(MemoryTargetDirectory::from_targets(config.remote_targets()));
    let records = Arc::new(MemorySessionRecords::new());
    let alerts = Arc::new(MemoryAlertStore::new());
    for definition in config.alerts.iter().cloned() {
        alerts.insert(definition)?;
    }

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&alerts) as Arc<dyn AlertStore>,
        Arc::clone(&directory) as Arc<dyn TargetResolver>,
        Arc::new(SshConnector::new(&config.scheduler.engine)),
        Arc::new(LogNotifier),
        config.scheduler.clone(),
    ));
    let scheduler_handle = Arc::clone(&scheduler).spawn();

    let gateway = GatewayState {
        resolver: directory,
        records: Arc::clone(&records) as Arc<dyn SessionRecordStore>,
        connector: Arc::new(SshConnector::new(&config.engine)),
        authenticator: Arc::new(StaticTokens::new(&config.operators)),
        engine: config.engine.clone(),
    };

    let api = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/api/alerts/{alert_id}/status", get(alert_status))
        .route("/api/sessions", get(active_sessions))
        .with_state(ApiState { scheduler, records });

    let app = api.merge(terminal_router(gateway)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("Server listening on http://{}", config.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_handle.stop().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn alert_status(
    Path(alert_id): Path<String>,
    State(state): State<ApiState>,
) -> Json<PollStatus> {
    Json(state.scheduler.status(&AlertId(alert_id)))
}

async fn active_sessions(
    State(state): State<ApiState>,
) -> Result<Json<Vec<SessionRecord>>, (StatusCode, String)> {
    state
        .records
        .active()
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

const INDEX_HTML: &str = include_str!("../static/index.html");
