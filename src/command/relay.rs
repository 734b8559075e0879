//! Parse-then-dispatch pipeline shared by the feed and the HTTP API

use std::sync::Arc;

use super::{CommandParser, Dispatcher, Inbound};
use crate::error::RelayError;
use crate::gateway::ControlGateway;
use crate::models::RelayResult;
use crate::registry::DeviceRegistry;

pub struct CommandRelay {
    registry: Arc<DeviceRegistry>,
    parser: CommandParser,
    dispatcher: Dispatcher,
}

impl CommandRelay {
    pub fn new(registry: Arc<DeviceRegistry>, gateway: Arc<dyn ControlGateway>) -> Self {
        Self {
            parser: CommandParser::new(registry.clone()),
            dispatcher: Dispatcher::new(registry.clone(), gateway),
            registry,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Handle one feed payload.
    ///
    /// Returns the JSON to publish back, or `None` for an echo of our own output.
    pub async fn handle(&self, payload: &str) -> Option<serde_json::Value> {
        tracing::debug!("Received message: {}", payload);

        let cmd = match self.parser.parse(payload) {
            Ok(Inbound::Echo) => {
                tracing::debug!("Ignoring JSON message (own publication)");
                return None;
            }
            Ok(Inbound::Command(cmd)) => cmd,
            Err(e) => {
                tracing::warn!("Rejected message '{}': {}", payload.trim(), e);
                return Some(e.report());
            }
        };

        tracing::info!("Parsed command: {}", cmd);

        match self.dispatcher.dispatch(&cmd).await {
            Ok(result) => {
                tracing::info!(
                    "Command {} finished ({} device(s), all succeeded: {})",
                    cmd,
                    result.outcomes.len(),
                    result.succeeded()
                );
                Some(to_payload(&result))
            }
            Err(e) => {
                tracing::error!("Dispatch of {} failed: {}", cmd, e);
                Some(e.report())
            }
        }
    }

    /// Run a command given as separate target and action
    pub async fn execute(&self, target: &str, action: &str) -> Result<RelayResult, RelayError> {
        let cmd = self.parser.parse_parts(target, action)?;
        tracing::info!("Executing command: {}", cmd);
        Ok(self.dispatcher.dispatch(&cmd).await?)
    }
}

fn to_payload(result: &RelayResult) -> serde_json::Value {
    serde_json::to_value(result).unwrap_or_else(|e| {
        serde_json::json!({
            "error": format!("Failed to encode result: {}", e),
            "timestamp": result.timestamp,
        })
    })
}
