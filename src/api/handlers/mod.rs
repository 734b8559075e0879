//! HTTP handlers module

mod control;

pub use self::control::*;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use super::RelayState;
use crate::models::DeviceEntry;

/// GET / - Banner
pub async fn index() -> &'static str {
    "Smart Plug Relay is running!"
}

/// GET /health - Liveness snapshot, always 200
pub async fn health_check(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.liveness.report().await)
}

#[derive(Serialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceEntry>,
    pub count: usize,
}

/// GET /api/devices - Registered devices in registry order
pub async fn list_devices(State(state): State<RelayState>) -> impl IntoResponse {
    let devices: Vec<DeviceEntry> = state.relay.registry().iter().cloned().collect();
    Json(DeviceListResponse {
        count: devices.len(),
        devices,
    })
}
