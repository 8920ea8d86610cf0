//! Metrics reporting endpoint.

use std::sync::RwLock;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::state::AppState;

/// `GET /api/v1/metrics` - request counters, pipeline throughput, and
/// per-endpoint latency statistics.
pub async fn get_metrics(state: web::Data<RwLock<AppState>>) -> AppResult<HttpResponse> {
    let state = state.read().unwrap();

    let endpoints: Vec<_> = state
        .endpoint_metrics
        .iter()
        .map(|(path, metrics)| {
            json!({
                "path": path,
                "count": metrics.count,
                "avg_duration_ms": metrics.avg_duration_ms(),
                "max_duration_ms": metrics.max_duration_ms,
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "uptime_seconds": state.uptime_seconds(),
        "totals": state.metrics.clone(),
        "active_sessions": state.sessions.len(),
        "endpoints": endpoints,
    })))
}
