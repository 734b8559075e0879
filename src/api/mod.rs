//! API module - HTTP handlers and routes

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::command::CommandRelay;
use crate::liveness::LivenessReporter;

/// Shared HTTP handler state
#[derive(Clone)]
pub struct RelayState {
    pub relay: Arc<CommandRelay>,
    pub liveness: LivenessReporter,
}

impl RelayState {
    pub fn new(relay: Arc<CommandRelay>, liveness: LivenessReporter) -> Self {
        Self { relay, liveness }
    }
}

pub fn routes() -> Router<RelayState> {
    Router::new()
        .route("/", get(handlers::index))
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        // Devices
        .route("/api/devices", get(handlers::list_devices))
        .route(
            "/api/devices/:device/:action",
            get(handlers::device_action).post(handlers::device_action),
        )
        // Control
        .route("/api/control", post(handlers::control))
        .route("/api/status", get(handlers::status_all))
        .route("/api/status/:device", get(handlers::device_status))
}
