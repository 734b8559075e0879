//! Device registry - static table of controllable outlets

use std::collections::HashSet;

use crate::error::DispatchError;
use crate::models::DeviceEntry;

/// Read-only device table, kept in configuration order
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    /// Build a registry, rejecting an empty table and keys `find` could not tell apart.
    ///
    /// Keys must be unique ignoring case, and no display name may equal another
    /// entry's key, otherwise that entry is unreachable from the feed.
    pub fn new(devices: Vec<DeviceEntry>) -> Result<Self, DispatchError> {
        if devices.is_empty() {
            return Err(DispatchError::EmptyRegistry);
        }

        let mut seen = HashSet::new();
        for device in &devices {
            if !seen.insert(device.key.to_lowercase()) {
                return Err(DispatchError::DuplicateKey(device.key.clone()));
            }
        }

        for device in devices.iter().filter(|d| !d.name.is_empty()) {
            let name = device.name.to_lowercase();
            if devices
                .iter()
                .any(|other| other.key != device.key && other.key.to_lowercase() == name)
            {
                return Err(DispatchError::DuplicateKey(device.name.clone()));
            }
        }

        Ok(Self { devices })
    }

    /// Exact, case-sensitive key lookup
    pub fn get(&self, key: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.key == key)
    }

    /// Normalized lookup used for inbound commands.
    ///
    /// Matches the key case-insensitively first, then the display name.
    pub fn find(&self, name: &str) -> Option<&DeviceEntry> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }

        self.devices
            .iter()
            .find(|d| d.key.to_lowercase() == wanted)
            .or_else(|| {
                self.devices
                    .iter()
                    .find(|d| !d.name.is_empty() && d.name.to_lowercase() == wanted)
            })
    }

    pub fn keys(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
