//! Liveness reporting - feed heartbeat and HTTP health snapshot

mod heartbeat;

pub use self::heartbeat::Heartbeat;

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feed::{ConnectionState, FeedState};

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub mqtt_connected: bool,
    pub feed_state: FeedState,
    pub uptime: f64,
    pub service: &'static str,
    pub version: &'static str,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Read-only view over process uptime and feed connection state
#[derive(Debug, Clone)]
pub struct LivenessReporter {
    state: ConnectionState,
    started_at: Instant,
}

impl LivenessReporter {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.state
    }

    /// `healthy` while the feed is connected, `degraded` otherwise
    pub async fn report(&self) -> HealthReport {
        let snapshot = self.state.snapshot().await;

        HealthReport {
            status: if snapshot.connected { "healthy" } else { "degraded" },
            mqtt_connected: snapshot.connected,
            feed_state: snapshot.state,
            uptime: self.uptime_secs(),
            service: "plug_relay",
            version: env!("CARGO_PKG_VERSION"),
            last_connected_at: snapshot.last_connected_at,
            last_error: snapshot.last_error,
        }
    }
}
