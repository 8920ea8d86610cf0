//! Health check endpoints.

use std::sync::RwLock;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::error::AppResult;
use crate::state::AppState;

/// `GET /health` - liveness probe.
pub async fn health_check() -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// `GET /api/v1/health` - readiness with session and uptime details.
pub async fn detailed_health(state: web::Data<RwLock<AppState>>) -> AppResult<HttpResponse> {
    let state = state.read().unwrap();
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "active_sessions": state.sessions.len(),
        "max_sessions": state.config.performance.max_concurrent_sessions,
    })))
}
