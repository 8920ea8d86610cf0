//! Session listing endpoint.

use std::sync::RwLock;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::state::AppState;

/// `GET /api/v1/sessions` - live transcription sessions.
pub async fn list_sessions(state: web::Data<RwLock<AppState>>) -> AppResult<HttpResponse> {
    let state = state.read().unwrap();
    let mut sessions: Vec<_> = state.sessions.values().cloned().collect();
    sessions.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));

    Ok(HttpResponse::Ok().json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}
