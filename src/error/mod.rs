//! Error handling module

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::{unix_timestamp, Action};

/// Example commands included in malformed-message reports
const COMMAND_EXAMPLES: [&str; 3] = ["cactus:on", "ananas:off", "all:status"];

/// Rejection of an inbound command payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid message format: {0}")]
    MalformedMessage(String),

    #[error("Invalid action: {action}")]
    UnknownAction { target: String, action: String },

    #[error("Unknown device: {device}")]
    UnknownDevice { device: String, known: Vec<String> },
}

impl ParseError {
    /// Error payload published on the feed in place of a result
    pub fn report(&self) -> serde_json::Value {
        match self {
            ParseError::MalformedMessage(_) => json!({
                "error": "Invalid message format",
                "expected": "device:action",
                "examples": COMMAND_EXAMPLES,
                "timestamp": unix_timestamp(),
            }),
            ParseError::UnknownAction { target, action } => json!({
                "error": format!("Invalid action: {}", action),
                "device": target,
                "available_actions": Action::ALL.iter().map(Action::as_str).collect::<Vec<_>>(),
                "timestamp": unix_timestamp(),
            }),
            ParseError::UnknownDevice { device, known } => json!({
                "error": format!("Unknown device: {}", device),
                "available_devices": known,
                "timestamp": unix_timestamp(),
            }),
        }
    }
}

/// Failure of the dispatcher itself, as opposed to a single device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Device registry is empty")]
    EmptyRegistry,

    #[error("Duplicate device key: {0}")]
    DuplicateKey(String),

    #[error("Device not registered: {0}")]
    UnregisteredDevice(String),
}

impl DispatchError {
    pub fn report(&self) -> serde_json::Value {
        json!({
            "error": self.to_string(),
            "timestamp": unix_timestamp(),
        })
    }
}

/// Any reason a command could not produce a `RelayResult`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Remote device-control backend failure
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Cloud session not established")]
    NotAuthenticated,

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cloud API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Gateway configuration error: {0}")]
    Config(String),
}

/// Message-bus failure; recovered by reconnecting, never fatal
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Feed publisher has stopped")]
    Closed,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::UnknownDevice { .. } => AppError::NotFound(err.to_string()),
            ParseError::MalformedMessage(_) | ParseError::UnknownAction { .. } => {
                AppError::BadRequest(err.to_string())
            }
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Parse(e) => e.into(),
            RelayError::Dispatch(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_report_lists_examples() {
        let report = ParseError::MalformedMessage("bogus".into()).report();
        assert_eq!(report["error"], "Invalid message format");
        assert_eq!(report["expected"], "device:action");
        assert_eq!(report["examples"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_device_report_lists_known_keys() {
        let err = ParseError::UnknownDevice {
            device: "ghost".into(),
            known: vec!["cactus".into(), "dino".into()],
        };
        let report = err.report();
        assert_eq!(report["error"], "Unknown device: ghost");
        assert_eq!(report["available_devices"], json!(["cactus", "dino"]));
    }

    #[test]
    fn test_unknown_action_report() {
        let err = ParseError::UnknownAction {
            target: "cactus".into(),
            action: "toggle".into(),
        };
        let report = err.report();
        assert_eq!(report["device"], "cactus");
        assert_eq!(report["available_actions"], json!(["on", "off", "status"]));
    }

    #[test]
    fn test_parse_error_status_mapping() {
        let not_found: AppError = ParseError::UnknownDevice {
            device: "ghost".into(),
            known: vec![],
        }
        .into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let bad: AppError = ParseError::UnknownAction {
            target: "all".into(),
            action: "".into(),
        }
        .into();
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
