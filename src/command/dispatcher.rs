//! Command dispatcher - resolves commands to gateway calls

use std::sync::Arc;

use super::parser::ParsedCommand;
use crate::error::DispatchError;
use crate::gateway::ControlGateway;
use crate::models::{Action, ControlOutcome, DeviceEntry, RelayResult, Target};
use crate::registry::DeviceRegistry;

pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    gateway: Arc<dyn ControlGateway>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, gateway: Arc<dyn ControlGateway>) -> Self {
        Self { registry, gateway }
    }

    /// Run a command against one device or every registered device.
    ///
    /// Device failures are captured in their outcome; only registry problems
    /// fail the dispatch as a whole.
    pub async fn dispatch(&self, cmd: &ParsedCommand) -> Result<RelayResult, DispatchError> {
        let action = cmd.action();

        let outcomes = match cmd.target() {
            Target::All => {
                if self.registry.is_empty() {
                    return Err(DispatchError::EmptyRegistry);
                }

                tracing::info!("Controlling ALL devices: {}", action);
                let mut outcomes = Vec::with_capacity(self.registry.len());
                for entry in self.registry.iter() {
                    outcomes.push(self.invoke(entry, action).await);
                }
                outcomes
            }
            Target::Device(key) => {
                let entry = self
                    .registry
                    .get(key)
                    .ok_or_else(|| DispatchError::UnregisteredDevice(key.clone()))?;
                vec![self.invoke(entry, action).await]
            }
        };

        Ok(RelayResult::new(cmd.target().clone(), action, outcomes))
    }

    async fn invoke(&self, entry: &DeviceEntry, action: Action) -> ControlOutcome {
        tracing::debug!(
            "Invoking {} via {} on {} ({})",
            action,
            self.gateway.name(),
            entry.key,
            entry.remote_id
        );

        let result = self.gateway.invoke(&entry.remote_id, action).await;
        if result.success {
            ControlOutcome::success(entry, result.raw)
        } else {
            let message = result.error_text();
            tracing::warn!("Device {} failed to {}: {}", entry.key, action, message);
            ControlOutcome::failure(entry, message)
        }
    }
}
