//! Session refresh scheduler

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use super::TuyaCloud;

const UNAUTHENTICATED_RETRY: Duration = Duration::from_secs(30);

/// Re-authenticates the cloud session in the background, off the request path
pub struct SessionRefresher {
    cloud: Arc<TuyaCloud>,
    period: Duration,
}

impl SessionRefresher {
    pub fn new(cloud: Arc<TuyaCloud>, period: Duration) -> Self {
        Self { cloud, period }
    }

    /// Start the refresh loop.
    ///
    /// While no session exists the loop retries every `UNAUTHENTICATED_RETRY`
    /// instead of waiting a full period.
    pub async fn start(self: Arc<Self>) {
        tracing::info!(
            "Starting cloud session refresher (interval: {}s)...",
            self.period.as_secs()
        );

        loop {
            let delay = if self.cloud.has_session().await {
                self.period
            } else {
                UNAUTHENTICATED_RETRY.min(self.period)
            };
            sleep(delay).await;
            self.refresh_once().await;
        }
    }

    /// Single refresh attempt; failures are logged and retried next period
    pub async fn refresh_once(&self) -> bool {
        match self.cloud.authenticate().await {
            Ok(()) => {
                tracing::info!("Cloud session refreshed");
                true
            }
            Err(e) => {
                tracing::error!("Cloud session refresh failed: {}", e);
                false
            }
        }
    }
}
