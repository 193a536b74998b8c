//! Health and status endpoints

use axum::{Json, extract::State as AxumState};
use serde::Serialize;

use crate::SharedState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub total_routines: usize,
    pub mail_enabled: bool,
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /status - server information
pub async fn status(AxumState(state): AxumState<SharedState>) -> Json<StatusResponse> {
    let config = state.dispatcher.config();
    Json(StatusResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        started_at: state.started_at.to_rfc3339(),
        total_routines: config.routines.len(),
        mail_enabled: config.mail.is_some(),
    })
}
