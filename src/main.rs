//! Smart plug relay
//!
//! Relays `<device>:<action>` commands from an MQTT feed to Tuya cloud
//! smart plugs and publishes the results back on the same feed, with a
//! small HTTP surface for health checks and direct control.

mod api;
mod command;
mod config;
mod error;
mod feed;
mod gateway;
mod liveness;
mod models;
mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::RelayState;
use crate::command::CommandRelay;
use crate::feed::{ConnectionState, FeedConnector, FeedHandle};
use crate::gateway::{SessionRefresher, TuyaCloud};
use crate::liveness::{Heartbeat, LivenessReporter};
use crate::registry::DeviceRegistry;

/// How long shutdown waits for the feed to flush its last messages
const FEED_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plug_relay=info,tower_http=info".into()),
        )
        .init();

    tracing::info!("Starting Smart Plug Relay v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::Config::load()?;
    tracing::info!("Configuration loaded");

    let registry = Arc::new(DeviceRegistry::new(config.device_entries()?)?);
    tracing::info!("Device registry loaded: {}", registry.keys().join(", "));

    // Cloud session; a failed first login is retried by the refresher
    let cloud = Arc::new(TuyaCloud::new(&config.tuya)?);
    tracing::info!(
        "Tuya cloud client for region {} ({})",
        config.tuya.region,
        cloud.base_url()
    );
    if let Err(e) = cloud.authenticate().await {
        tracing::warn!("Initial cloud authentication failed (non-fatal): {}", e);
    }

    let relay = Arc::new(CommandRelay::new(registry.clone(), cloud.clone()));
    let connection = ConnectionState::new();
    let liveness = LivenessReporter::new(connection.clone());

    let connector = FeedConnector::new(&config.mqtt, relay.clone(), connection);
    let feed = connector.handle();
    tracing::info!("Relaying commands on feed {}", feed.feed());
    let feed_task = tokio::spawn(connector.run());

    start_background_tasks(
        cloud,
        Duration::from_secs(config.tuya.session_refresh_secs),
        feed.clone(),
        liveness.clone(),
        Duration::from_secs(config.heartbeat_secs),
    );

    // Build application router
    let app = api::routes()
        .with_state(RelayState::new(relay, liveness))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, closing feed...");
    feed.shutdown().await;
    if tokio::time::timeout(FEED_SHUTDOWN_GRACE, feed_task).await.is_err() {
        tracing::warn!("Feed connector did not stop in time");
    }

    tracing::info!("Smart Plug Relay stopped");
    Ok(())
}

/// Start background tasks (session refresher, heartbeat)
fn start_background_tasks(
    cloud: Arc<TuyaCloud>,
    refresh_period: Duration,
    feed: FeedHandle,
    liveness: LivenessReporter,
    heartbeat_period: Duration,
) {
    let refresher = Arc::new(SessionRefresher::new(cloud, refresh_period));
    tokio::spawn(async move {
        refresher.start().await;
    });

    let heartbeat = Arc::new(Heartbeat::new(Arc::new(feed), liveness, heartbeat_period));
    tokio::spawn(async move {
        heartbeat.start().await;
    });

    tracing::info!("Background tasks started");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
