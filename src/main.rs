//! # Live Caption Backend
//!
//! Real-time speech transcription server. Clients stream microphone audio
//! over a WebSocket; the server windows it, runs a speech engine over each
//! window, and streams stabilized partial/final caption events back.
//!
//! ## Endpoints:
//! - `GET /ws/audio` - WebSocket audio streaming and caption delivery
//! - `GET /health` - liveness probe
//! - `GET /api/v1/health` - readiness with session details
//! - `GET /api/v1/metrics` - request and pipeline metrics
//! - `GET|PUT /api/v1/config` - runtime configuration
//! - `GET /api/v1/sessions` - live session listing

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod stabilize;
mod state;
mod transcription;
mod websocket;

use std::sync::{Arc, RwLock};

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::stabilize::{CounterStore, MemoryStore, SqliteStore};
use crate::state::AppState;
use crate::transcription::{build_engine, SpeechEngine};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn CounterStore> = if config.stabilizer.store_path.is_empty() {
        info!("Correction store: in-memory (counts reset on restart)");
        Arc::new(MemoryStore::new())
    } else {
        info!(path = %config.stabilizer.store_path, "Correction store: sqlite");
        Arc::new(
            SqliteStore::open(&config.stabilizer.store_path)
                .context("Failed to open correction store")?,
        )
    };

    let engine: Arc<dyn SpeechEngine> =
        build_engine(&config.engine).context("Failed to build speech engine")?;
    info!(backend = engine.name(), "Speech engine ready");

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = web::Data::new(RwLock::new(AppState::new(config)));
    let engine_data = web::Data::new(engine);
    let store_data = web::Data::new(store);

    info!(%host, port, "Starting live caption server");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .app_data(engine_data.clone())
            .app_data(store_data.clone())
            .wrap(cors)
            .wrap(middleware::RequestLogging)
            .wrap(middleware::MetricsCollector)
            .route("/health", web::get().to(health::health_check))
            .route("/ws/audio", web::get().to(websocket::ws_route))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::detailed_health))
                    .route("/metrics", web::get().to(handlers::metrics::get_metrics))
                    .route("/config", web::get().to(handlers::config::get_config))
                    .route("/config", web::put().to(handlers::config::update_config))
                    .route("/sessions", web::get().to(handlers::sessions::list_sessions)),
            )
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("Failed to bind {host}:{port}"))?
    .run()
    .await?;

    info!("Server stopped");
    Ok(())
}
