//! Control gateway - adapter to the remote device-control backend
//!
//! - `tuya`: Tuya cloud OpenAPI client (request signing, session token)
//! - `refresh`: Background session re-authentication

pub mod refresh;
pub mod tuya;

pub use refresh::SessionRefresher;
pub use tuya::TuyaCloud;

use async_trait::async_trait;

use crate::models::Action;

/// Outcome of a single backend call, failures already contained
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResult {
    pub success: bool,
    pub raw: serde_json::Value,
}

impl GatewayResult {
    pub fn ok(raw: serde_json::Value) -> Self {
        Self { success: true, raw }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            success: false,
            raw: serde_json::Value::String(description.into()),
        }
    }

    /// Human-readable failure text
    pub fn error_text(&self) -> String {
        match &self.raw {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Device-control backend
///
/// Implementations must never panic or propagate transport errors: every
/// failure is reported as `GatewayResult { success: false, .. }`.
#[async_trait]
pub trait ControlGateway: Send + Sync {
    /// Switch or query the device identified by `remote_id`
    async fn invoke(&self, remote_id: &str, action: Action) -> GatewayResult;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
