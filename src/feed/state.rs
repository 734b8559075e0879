//! Feed connection state machine

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Transient; the connector backs off and moves to `Connecting`
    ConnectFailed,
}

/// Transport callbacks driving the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Attempt,
    Established,
    Lost(String),
}

impl FeedState {
    pub fn next(self, event: &FeedEvent) -> FeedState {
        match (self, event) {
            (FeedState::Disconnected | FeedState::ConnectFailed, FeedEvent::Attempt) => {
                FeedState::Connecting
            }
            (_, FeedEvent::Established) => FeedState::Connected,
            (FeedState::Connecting, FeedEvent::Lost(_)) => FeedState::ConnectFailed,
            (FeedState::Connected, FeedEvent::Lost(_)) => FeedState::Disconnected,
            (state, _) => state,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionSnapshot {
    pub state: FeedState,
    pub connected: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Process-wide connection state.
///
/// Written only by the feed connector, read by liveness reporting.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    inner: Arc<RwLock<ConnectionSnapshot>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.connected
    }

    pub(crate) async fn apply(&self, event: FeedEvent) -> FeedState {
        let mut snapshot = self.inner.write().await;
        let previous = snapshot.state;
        snapshot.state = previous.next(&event);
        snapshot.connected = snapshot.state == FeedState::Connected;

        match event {
            FeedEvent::Established => {
                snapshot.last_connected_at = Some(Utc::now());
                snapshot.last_error = None;
            }
            FeedEvent::Lost(reason) => snapshot.last_error = Some(reason),
            FeedEvent::Attempt => {}
        }

        if previous != snapshot.state {
            tracing::debug!("Feed state {:?} -> {:?}", previous, snapshot.state);
        }
        snapshot.state
    }
}
