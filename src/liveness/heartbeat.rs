//! Periodic heartbeat publication

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use super::LivenessReporter;
use crate::feed::Publisher;
use crate::models::FeedNotice;

pub struct Heartbeat {
    publisher: Arc<dyn Publisher>,
    reporter: LivenessReporter,
    period: Duration,
}

impl Heartbeat {
    pub fn new(publisher: Arc<dyn Publisher>, reporter: LivenessReporter, period: Duration) -> Self {
        Self {
            publisher,
            reporter,
            period,
        }
    }

    /// Start the heartbeat loop
    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting heartbeat (interval: {}s)...", self.period.as_secs());

        let mut interval_timer = interval(self.period);
        // First tick fires immediately; the connect notice covers that moment.
        interval_timer.tick().await;

        loop {
            interval_timer.tick().await;
            self.beat().await;
        }
    }

    /// Publish one heartbeat if the feed is up. Returns whether one was sent.
    pub async fn beat(&self) -> bool {
        if !self.reporter.connection().is_connected().await {
            tracing::debug!("Feed disconnected, skipping heartbeat");
            return false;
        }

        let notice = FeedNotice::heartbeat(self.reporter.uptime_secs());
        let published = match serde_json::to_value(notice) {
            Ok(value) => self.publisher.publish(value).await,
            Err(e) => Err(e.into()),
        };

        match published {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Heartbeat publish failed: {}", e);
                false
            }
        }
    }
}
