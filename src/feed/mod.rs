//! Feed connector - MQTT session for the shared command/result feed
//!
//! - `state`: Connection state machine shared with the liveness reporter
//! - `backoff`: Reconnect delay policy
//! - `connector`: Event loop, subscription and publishing

pub mod backoff;
pub mod connector;
pub mod state;

pub use backoff::Backoff;
pub use connector::{FeedConnector, FeedHandle};
pub use state::{ConnectionState, FeedEvent, FeedState};

use async_trait::async_trait;

use crate::error::TransportError;

/// Anything results and notices can be published to
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: serde_json::Value) -> Result<(), TransportError>;
}
