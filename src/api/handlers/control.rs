//! Device control handlers
//!
//! Device failures come back as 200 with `success: false` in the outcome;
//! only unknown devices (404) and bad actions (400) are HTTP errors.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::api::RelayState;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

/// POST /api/control - Run `{device, action}`; device defaults to all
pub async fn control(
    State(state): State<RelayState>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let action = payload
        .action
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| AppError::BadRequest("No action specified".to_string()))?;
    let device = payload.device.as_deref().unwrap_or("all");

    let result = state.relay.execute(device, action).await?;
    Ok(Json(result))
}

/// GET|POST /api/devices/:device/:action - Run a command from path parameters
pub async fn device_action(
    State(state): State<RelayState>,
    Path((device, action)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.relay.execute(&device, &action).await?;
    Ok(Json(result))
}

/// GET /api/status - Status of every device
pub async fn status_all(State(state): State<RelayState>) -> Result<impl IntoResponse, AppError> {
    let result = state.relay.execute("all", "status").await?;
    Ok(Json(result))
}

/// GET /api/status/:device - Status of one device
pub async fn device_status(
    State(state): State<RelayState>,
    Path(device): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let result = state.relay.execute(&device, "status").await?;
    Ok(Json(result))
}
