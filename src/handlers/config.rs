//! # Configuration Endpoints
//!
//! `GET /api/v1/config` returns the active configuration; `PUT` applies a
//! partial update. Updates are validated before being accepted and take
//! effect for sessions that connect afterwards; live sessions keep the
//! parameters they were wired with.

use std::sync::RwLock;

use actix_web::{web, HttpResponse};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub async fn get_config(state: web::Data<RwLock<AppState>>) -> AppResult<HttpResponse> {
    let state = state.read().unwrap();
    Ok(HttpResponse::Ok().json(&state.config))
}

pub async fn update_config(
    state: web::Data<RwLock<AppState>>,
    body: String,
) -> AppResult<HttpResponse> {
    let mut state = state.write().unwrap();

    state
        .config
        .update_from_json(&body)
        .map_err(|error| AppError::ValidationError(error.to_string()))?;

    info!("Configuration updated via API");
    Ok(HttpResponse::Ok().json(&state.config))
}
