//! MQTT feed connector
//!
//! Three tasks share the session:
//! - the poll loop in `run`, which only drives the `EventLoop` and never awaits the client
//! - a relay worker handling inbound payloads one at a time, in arrival order
//! - a publisher task feeding subscribe/publish/disconnect requests to the client in order

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use tokio::sync::mpsc;

use super::{Backoff, ConnectionState, FeedEvent, Publisher};
use crate::command::CommandRelay;
use crate::config::MqttConfig;
use crate::error::TransportError;
use crate::models::FeedNotice;

/// Capacity of rumqttc's request channel. Only the publisher task sends on it.
const CHANNEL_CAPACITY: usize = 10;

/// Session requests, applied by the publisher task in queue order
#[derive(Debug)]
enum Outbound {
    Subscribe,
    Publish(serde_json::Value),
    Disconnect,
}

/// Cloneable handle for publishing on the feed from other tasks
#[derive(Clone)]
pub struct FeedHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    feed: String,
    state: ConnectionState,
    shutting_down: Arc<AtomicBool>,
}

impl FeedHandle {
    pub fn feed(&self) -> &str {
        &self.feed
    }

    fn enqueue(&self, request: Outbound) -> Result<(), TransportError> {
        self.outbound.send(request).map_err(|_| TransportError::Closed)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Announce departure and close the session; the connector loop then exits
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        if self.state.is_connected().await {
            let queued = serde_json::to_value(FeedNotice::disconnecting())
                .map_err(TransportError::from)
                .and_then(|notice| self.enqueue(Outbound::Publish(notice)));
            if let Err(e) = queued {
                tracing::warn!("Failed to queue disconnect notice: {}", e);
            }
        }

        if let Err(e) = self.enqueue(Outbound::Disconnect) {
            tracing::warn!("MQTT disconnect request failed: {}", e);
        }
    }
}

#[async_trait]
impl Publisher for FeedHandle {
    async fn publish(&self, payload: serde_json::Value) -> Result<(), TransportError> {
        self.enqueue(Outbound::Publish(payload))
    }
}

/// Owns the MQTT event loop: connect, subscribe, relay, reconnect
pub struct FeedConnector {
    handle: FeedHandle,
    client: AsyncClient,
    eventloop: EventLoop,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    relay: Arc<CommandRelay>,
    backoff: Backoff,
    broker: String,
}

impl FeedConnector {
    pub fn new(config: &MqttConfig, relay: Arc<CommandRelay>, state: ConnectionState) -> Self {
        let client_id = format!(
            "{}_{}",
            config.client_id_prefix,
            rand::thread_rng().gen_range(1000..10000)
        );

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        tracing::info!(
            "MQTT client {} for {}:{} (tls: {}), feed {}",
            client_id,
            config.host,
            config.port,
            config.tls,
            config.feed
        );

        let (client, eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            handle: FeedHandle {
                outbound: outbound_tx,
                feed: config.feed.clone(),
                state,
                shutting_down: Arc::new(AtomicBool::new(false)),
            },
            client,
            eventloop,
            outbound: outbound_rx,
            relay,
            backoff: Backoff::new(
                Duration::from_secs(config.reconnect_min_secs),
                Duration::from_secs(config.reconnect_max_secs),
            ),
            broker: format!("{}:{}", config.host, config.port),
        }
    }

    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// Drive the connection until shutdown. Reconnects indefinitely.
    pub async fn run(self) {
        let FeedConnector {
            handle,
            client,
            mut eventloop,
            outbound,
            relay,
            mut backoff,
            broker,
        } = self;
        let state = handle.state.clone();

        let publisher = tokio::spawn(publish_outbound(client, handle.feed.clone(), outbound));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let worker = tokio::spawn(relay_inbound(relay.clone(), handle.clone(), inbound_rx));

        tracing::info!("Connecting to MQTT broker {}", broker);
        state.apply(FeedEvent::Attempt).await;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker {}", broker);
                    backoff.reset();
                    state.apply(FeedEvent::Established).await;
                    announce(&handle, relay.registry().keys());
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    tracing::debug!("Message on {}", publish.topic);
                    let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                    if inbound_tx.send(payload).is_err() {
                        tracing::error!("Relay worker stopped, dropping message");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    tracing::warn!("Broker closed the MQTT session");
                    state
                        .apply(FeedEvent::Lost("disconnected by broker".to_string()))
                        .await;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) if handle.is_shutting_down() => {
                    tracing::info!("Disconnected from MQTT broker");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if handle.is_shutting_down() {
                        break;
                    }

                    let reason = TransportError::from(e).to_string();
                    state.apply(FeedEvent::Lost(reason.clone())).await;

                    let delay = backoff.next_delay();
                    tracing::error!("{} (reconnecting in {}s)", reason, delay.as_secs());
                    tokio::time::sleep(delay).await;

                    state.apply(FeedEvent::Attempt).await;
                }
            }
        }

        state.apply(FeedEvent::Lost("shut down".to_string())).await;

        // Let commands already received finish; their results have no session left.
        drop(inbound_tx);
        if let Err(e) = worker.await {
            tracing::warn!("Relay worker ended abnormally: {}", e);
        }
        publisher.abort();

        tracing::info!("Feed connector stopped");
    }
}

/// Subscriptions do not survive a reconnect, so subscribe on every ConnAck
fn announce(handle: &FeedHandle, devices: Vec<String>) {
    let queued = handle.enqueue(Outbound::Subscribe).and_then(|()| {
        let notice = serde_json::to_value(FeedNotice::connected(devices))?;
        handle.enqueue(Outbound::Publish(notice))
    });

    if let Err(e) = queued {
        tracing::warn!("Failed to queue subscription and connection notice: {}", e);
    }
}

async fn publish_outbound(
    client: AsyncClient,
    feed: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(request) = outbound.recv().await {
        if let Err(e) = send_outbound(&client, &feed, request).await {
            tracing::error!("Feed request on {} failed: {}", feed, e);
        }
    }
}

async fn send_outbound(
    client: &AsyncClient,
    feed: &str,
    request: Outbound,
) -> Result<(), TransportError> {
    match request {
        Outbound::Subscribe => {
            client.subscribe(feed, QoS::AtLeastOnce).await?;
            tracing::info!("Subscribing to {}", feed);
        }
        Outbound::Publish(payload) => {
            client
                .publish(feed, QoS::AtLeastOnce, false, payload.to_string().into_bytes())
                .await?;
        }
        Outbound::Disconnect => client.disconnect().await?,
    }
    Ok(())
}

async fn relay_inbound(
    relay: Arc<CommandRelay>,
    handle: FeedHandle,
    mut inbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(payload) = inbound.recv().await {
        relay_message(&relay, &handle, &payload).await;
    }
}

/// Parse, dispatch and publish the result for one inbound payload.
///
/// Echoes produce no publication.
pub async fn relay_message(relay: &CommandRelay, publisher: &dyn Publisher, payload: &str) {
    let Some(response) = relay.handle(payload).await else {
        return;
    };

    if let Err(e) = publisher.publish(response).await {
        tracing::error!("Failed to publish result: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    use super::*;
    use crate::feed::testing::RecordingPublisher;
    use crate::gateway::testing::RecordingGateway;
    use crate::models::DeviceEntry;
    use crate::registry::DeviceRegistry;

    const FEED: &str = "user/feeds/smart_plugs";

    fn relay(gateway: Arc<RecordingGateway>) -> CommandRelay {
        let registry = DeviceRegistry::new(vec![
            DeviceEntry::new("cactus", "id-cactus", "Cactus"),
            DeviceEntry::new("ananas", "id-ananas", "Ananas"),
        ])
        .unwrap();
        CommandRelay::new(Arc::new(registry), gateway)
    }

    fn local_config(port: u16) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".into(),
            port,
            tls: false,
            username: String::new(),
            password: String::new(),
            feed: FEED.into(),
            client_id_prefix: "test".into(),
            keep_alive_secs: 60,
            reconnect_min_secs: 1,
            reconnect_max_secs: 1,
        }
    }

    /// What the loopback broker saw from the client
    #[derive(Debug)]
    enum Seen {
        Subscribe,
        Publish(serde_json::Value),
        Disconnect,
    }

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// QoS 0 PUBLISH from the broker
    fn publish_packet(topic: &str, payload: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload.as_bytes());

        let mut packet = vec![0x30];
        let mut len = body.len();
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            packet.push(byte);
            if len == 0 {
                break;
            }
        }
        packet.extend(body);
        packet
    }

    /// Packet id (QoS > 0) and JSON payload of a client PUBLISH
    fn decode_publish(header: u8, body: &[u8]) -> (Option<[u8; 2]>, serde_json::Value) {
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        assert_eq!(&body[2..2 + topic_len], FEED.as_bytes());

        let mut rest = &body[2 + topic_len..];
        let pkid = if (header >> 1) & 0x03 > 0 {
            let id = [rest[0], rest[1]];
            rest = &rest[2..];
            Some(id)
        } else {
            None
        };
        (pkid, serde_json::from_slice(rest).unwrap())
    }

    /// One broker session: CONNACK, ack everything, report it on `seen`.
    ///
    /// `burst` is written in a single write right after the SUBACK. The session
    /// drops the socket after `publish_limit` client publishes, if set.
    async fn serve_session(
        mut stream: TcpStream,
        seen: mpsc::UnboundedSender<Seen>,
        mut burst: Vec<u8>,
        publish_limit: Option<usize>,
    ) {
        let (header, _) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header >> 4, 1, "expected CONNECT");
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let mut publishes = 0;
        while let Ok((header, body)) = read_packet(&mut stream).await {
            match header >> 4 {
                8 => {
                    let _ = seen.send(Seen::Subscribe);
                    let _ = stream.write_all(&[0x90, 0x03, body[0], body[1], 0x01]).await;
                    if !burst.is_empty() {
                        let _ = stream.write_all(&burst).await;
                        burst.clear();
                    }
                }
                3 => {
                    let (pkid, payload) = decode_publish(header, &body);
                    let _ = seen.send(Seen::Publish(payload));
                    if let Some(id) = pkid {
                        let _ = stream.write_all(&[0x40, 0x02, id[0], id[1]]).await;
                    }
                    publishes += 1;
                    if Some(publishes) == publish_limit {
                        return;
                    }
                }
                12 => {
                    let _ = stream.write_all(&[0xD0, 0x00]).await;
                }
                14 => {
                    let _ = seen.send(Seen::Disconnect);
                    return;
                }
                _ => {}
            }
        }
    }

    async fn next(seen: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        timeout(Duration::from_secs(10), seen.recv())
            .await
            .expect("broker saw nothing for 10s")
            .expect("broker task ended")
    }

    async fn expect_publish(seen: &mut mpsc::UnboundedReceiver<Seen>) -> serde_json::Value {
        match next(seen).await {
            Seen::Publish(payload) => payload,
            other => panic!("expected a publish, got {:?}", other),
        }
    }

    async fn expect_connected(seen: &mut mpsc::UnboundedReceiver<Seen>) {
        assert!(matches!(next(seen).await, Seen::Subscribe));
        let notice = expect_publish(seen).await;
        assert_eq!(notice["status"], "connected");
        assert_eq!(notice["devices"], json!(["cactus", "ananas"]));
    }

    #[tokio::test]
    async fn test_echo_publishes_nothing() {
        let gateway = Arc::new(RecordingGateway::new());
        let relay = relay(gateway.clone());
        let publisher = RecordingPublisher::default();

        relay_message(&relay, &publisher, r#"{"status":"connected"}"#).await;

        assert!(publisher.published().is_empty());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_each_command_publishes_once_in_order() {
        let relay = relay(Arc::new(RecordingGateway::new()));
        let publisher = RecordingPublisher::default();

        for payload in ["cactus:on", "bogus", "all:status", "ghost:off"] {
            relay_message(&relay, &publisher, payload).await;
        }

        let published = publisher.published();
        assert_eq!(published.len(), 4);
        assert_eq!(published[0]["device"], "cactus");
        assert_eq!(published[1]["error"], "Invalid message format");
        assert_eq!(published[2]["device"], "all");
        assert_eq!(published[3]["error"], "Unknown device: ghost");
    }

    #[tokio::test]
    async fn test_shutdown_before_connect_skips_notice() {
        let state = ConnectionState::new();
        let connector = FeedConnector::new(
            &local_config(1883),
            Arc::new(relay(Arc::new(RecordingGateway::new()))),
            state.clone(),
        );
        let mut outbound = connector.outbound;
        let handle = connector.handle;

        assert_eq!(handle.feed(), FEED);
        handle.shutdown().await;

        assert!(handle.is_shutting_down());
        assert!(matches!(outbound.try_recv(), Ok(Outbound::Disconnect)));
        assert!(outbound.try_recv().is_err());
        assert!(!state.is_connected().await);
    }

    #[tokio::test]
    async fn test_resubscribes_and_announces_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // First session is dropped right after the connection notice
            let (stream, _) = listener.accept().await.unwrap();
            serve_session(stream, seen_tx.clone(), Vec::new(), Some(1)).await;
            let (stream, _) = listener.accept().await.unwrap();
            serve_session(stream, seen_tx, Vec::new(), None).await;
        });

        let state = ConnectionState::new();
        let connector = FeedConnector::new(
            &local_config(port),
            Arc::new(relay(Arc::new(RecordingGateway::new()))),
            state.clone(),
        );
        let handle = connector.handle();
        let task = tokio::spawn(connector.run());

        expect_connected(&mut seen).await;
        expect_connected(&mut seen).await;
        assert!(state.is_connected().await);

        handle.shutdown().await;
        assert_eq!(expect_publish(&mut seen).await["status"], "disconnecting");
        assert!(matches!(next(&mut seen).await, Seen::Disconnect));

        timeout(Duration::from_secs(10), task)
            .await
            .expect("connector should stop after shutdown")
            .unwrap();
        assert!(!state.is_connected().await);
    }

    #[tokio::test]
    async fn test_burst_yields_one_result_per_command_in_order() {
        const BURST: usize = 40;
        let commands: Vec<&str> = (0..BURST)
            .map(|i| if i % 2 == 0 { "cactus:on" } else { "bogus" })
            .collect();
        let burst: Vec<u8> = commands
            .iter()
            .flat_map(|command| publish_packet(FEED, command))
            .collect();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve_session(stream, seen_tx, burst, None).await;
        });

        let gateway = Arc::new(RecordingGateway::new());
        let connector = FeedConnector::new(
            &local_config(port),
            Arc::new(relay(gateway.clone())),
            ConnectionState::new(),
        );
        let handle = connector.handle();
        let task = tokio::spawn(connector.run());

        expect_connected(&mut seen).await;
        for (i, command) in commands.iter().enumerate() {
            let result = expect_publish(&mut seen).await;
            if *command == "bogus" {
                assert_eq!(result["error"], "Invalid message format", "result {}", i);
            } else {
                assert_eq!(result["device"], "cactus", "result {}", i);
                assert_eq!(result["result"]["success"], true);
            }
        }
        assert_eq!(gateway.call_count(), BURST / 2);

        handle.shutdown().await;
        assert_eq!(expect_publish(&mut seen).await["status"], "disconnecting");
        assert!(matches!(next(&mut seen).await, Seen::Disconnect));
        timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    }
}
