//! Configuration module

use serde::Deserialize;

use crate::models::DeviceEntry;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub mqtt: MqttConfig,
    pub tuya: TuyaConfig,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    /// `key=remote_id[:Display Name],...`, appended after `devices`
    #[serde(default)]
    pub device_table: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub feed: String,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect_min_secs")]
    pub reconnect_min_secs: u64,
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TuyaConfig {
    #[serde(default = "default_region")]
    pub region: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_switch_code")]
    pub switch_code: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_session_refresh_secs")]
    pub session_refresh_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_mqtt_host() -> String {
    "io.adafruit.com".to_string()
}

fn default_mqtt_port() -> u16 {
    8883
}

fn default_true() -> bool {
    true
}

fn default_client_id_prefix() -> String {
    "smart_plug_relay".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_min_secs() -> u64 {
    1
}

fn default_reconnect_max_secs() -> u64 {
    120
}

fn default_region() -> String {
    "us".to_string()
}

fn default_switch_code() -> String {
    "switch_1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_session_refresh_secs() -> u64 {
    3600
}

fn default_heartbeat_secs() -> u64 {
    60
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("PLUGRELAY").separator("__"))
            .build()?;

        let mut config: Config = settings.try_deserialize()?;

        // Hosting platforms hand out the listen port through PORT
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.mqtt.feed.trim().is_empty() {
            anyhow::bail!("mqtt.feed must not be empty");
        }
        if self.tuya.api_key.is_empty() || self.tuya.api_secret.is_empty() {
            anyhow::bail!("tuya.api_key and tuya.api_secret are required");
        }
        if self.mqtt.reconnect_min_secs == 0
            || self.mqtt.reconnect_min_secs > self.mqtt.reconnect_max_secs
        {
            anyhow::bail!("mqtt reconnect delays must satisfy 0 < min <= max");
        }
        if self.mqtt.keep_alive_secs < 5 {
            anyhow::bail!("mqtt.keep_alive_secs must be at least 5");
        }
        if self.heartbeat_secs == 0 || self.tuya.session_refresh_secs == 0 {
            anyhow::bail!("heartbeat_secs and tuya.session_refresh_secs must be positive");
        }
        Ok(())
    }

    /// Configured devices in order: the `devices` list, then `device_table`
    pub fn device_entries(&self) -> anyhow::Result<Vec<DeviceEntry>> {
        let mut entries = self.devices.clone();
        if let Some(table) = self.device_table.as_deref() {
            entries.extend(parse_device_table(table)?);
        }
        Ok(entries)
    }
}

/// Parse `key=remote_id[:Display Name]` entries separated by commas
pub fn parse_device_table(table: &str) -> anyhow::Result<Vec<DeviceEntry>> {
    table
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, rest) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("device entry '{}' is missing '='", entry))?;
            let (remote_id, name) = match rest.split_once(':') {
                Some((id, name)) => (id, name),
                None => (rest, ""),
            };

            let key = key.trim();
            let remote_id = remote_id.trim();
            if key.is_empty() || remote_id.is_empty() {
                anyhow::bail!("device entry '{}' needs both a key and a remote id", entry);
            }

            Ok(DeviceEntry::new(key, remote_id, name.trim()))
        })
        .collect()
}
