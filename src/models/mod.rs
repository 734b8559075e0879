//! Data models for the plug relay

use std::fmt;

use chrono::Utc;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Seconds since the Unix epoch with millisecond precision
pub fn unix_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

// ============================================================================
// Device Models
// ============================================================================

/// A controllable outlet known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub key: String,
    pub remote_id: String,
    #[serde(default)]
    pub name: String,
}

impl DeviceEntry {
    pub fn new(key: impl Into<String>, remote_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            remote_id: remote_id.into(),
            name: name.into(),
        }
    }

    /// Display name, falling back to the key when none was configured
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.key
        } else {
            &self.name
        }
    }
}

// ============================================================================
// Command Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    TurnOn,
    TurnOff,
    QueryStatus,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::TurnOn, Action::TurnOff, Action::QueryStatus];

    /// Map a lower-cased action token (including synonyms) to an action
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "on" | "true" | "1" => Some(Action::TurnOn),
            "off" | "false" | "0" => Some(Action::TurnOff),
            "status" => Some(Action::QueryStatus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::TurnOn => "on",
            Action::TurnOff => "off",
            Action::QueryStatus => "status",
        }
    }

    /// Switch value carried by on/off; `None` for status queries
    pub fn switch_value(&self) -> Option<bool> {
        match self {
            Action::TurnOn => Some(true),
            Action::TurnOff => Some(false),
            Action::QueryStatus => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Command target: every registered device or a single registry key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Device(String),
}

impl Target {
    pub fn as_str(&self) -> &str {
        match self {
            Target::All => "all",
            Target::Device(key) => key,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Result Models
// ============================================================================

/// Payload of a single control attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeDetail {
    Result(serde_json::Value),
    Error(String),
}

/// Result of one device-control attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlOutcome {
    pub device: String,
    pub name: String,
    #[serde(rename = "success")]
    pub succeeded: bool,
    #[serde(flatten)]
    pub detail: OutcomeDetail,
}

impl ControlOutcome {
    pub fn success(entry: &DeviceEntry, raw: serde_json::Value) -> Self {
        Self {
            device: entry.key.clone(),
            name: entry.display_name().to_string(),
            succeeded: true,
            detail: OutcomeDetail::Result(raw),
        }
    }

    pub fn failure(entry: &DeviceEntry, message: impl Into<String>) -> Self {
        Self {
            device: entry.key.clone(),
            name: entry.display_name().to_string(),
            succeeded: false,
            detail: OutcomeDetail::Error(message.into()),
        }
    }
}

/// The unit published back to the feed for a dispatched command
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResult {
    pub target: Target,
    pub action: Action,
    pub outcomes: Vec<ControlOutcome>,
    pub timestamp: f64,
}

impl RelayResult {
    pub fn new(target: Target, action: Action, outcomes: Vec<ControlOutcome>) -> Self {
        Self {
            target,
            action,
            outcomes,
            timestamp: unix_timestamp(),
        }
    }

    /// True when every addressed device reported success
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.succeeded)
    }
}

struct OutcomesByDevice<'a>(&'a [ControlOutcome]);

impl Serialize for OutcomesByDevice<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for outcome in self.0 {
            map.serialize_entry(&outcome.device, outcome)?;
        }
        map.end()
    }
}

impl Serialize for RelayResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("device", &self.target)?;
        map.serialize_entry("action", &self.action)?;
        match (&self.target, self.outcomes.as_slice()) {
            (Target::Device(_), [single]) => map.serialize_entry("result", single)?,
            (_, outcomes) => map.serialize_entry("result", &OutcomesByDevice(outcomes))?,
        }
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.end()
    }
}

// ============================================================================
// Feed Notices
// ============================================================================

/// Status notices published on the feed outside of command handling
#[derive(Debug, Clone, Serialize)]
pub struct FeedNotice {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<f64>,
    pub timestamp: f64,
}

pub const SERVER_NAME: &str = "smart_plug_relay";

impl FeedNotice {
    pub fn connected(devices: Vec<String>) -> Self {
        Self {
            status: "connected",
            server: Some(SERVER_NAME),
            devices: Some(devices),
            uptime: None,
            timestamp: unix_timestamp(),
        }
    }

    pub fn heartbeat(uptime_secs: f64) -> Self {
        Self {
            status: "heartbeat",
            server: None,
            devices: None,
            uptime: Some(uptime_secs),
            timestamp: unix_timestamp(),
        }
    }

    pub fn disconnecting() -> Self {
        Self {
            status: "disconnecting",
            server: None,
            devices: None,
            uptime: None,
            timestamp: unix_timestamp(),
        }
    }
}
