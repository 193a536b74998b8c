//! HTTP surface: the webhook endpoint plus liveness and status probes.

pub mod stats;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

pub use stats::{health, status};
pub use webhook::handle_webhook;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/payload", routing::post(handle_webhook))
        .route("/health", routing::get(health))
        .route("/status", routing::get(status))
        .with_state(state)
}
