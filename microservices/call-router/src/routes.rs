//! Router configuration for the call-router webhook API

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::AppState;

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health probes
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        // Voice webhooks (CXML responses)
        .route("/webhooks/voice", post(handlers::inbound_voice))
        .route("/webhooks/voice/ivr/{menu_id}", post(handlers::ivr_input))
        .route(
            "/webhooks/voice/ring-group/{group_id}",
            post(handlers::ring_group_callback),
        )
        // Call detail records (JSON ack)
        .route("/webhooks/cdr", post(handlers::cdr))
        .with_state(state)
}
