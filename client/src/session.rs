use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::unix_millis;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::{self, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the party's one duplex channel. Exactly one state is active
/// at a time; transitions are published on a watch channel for the
/// connectivity badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {attempt})")
            }
        }
    }
}

/// Owns the WebSocket connection to the relay and the reconnect loop.
///
/// The loop retries indefinitely at a fixed delay until `close()`; a
/// long-running watch party prefers a stubborn client over one that gives
/// up. Outbound frames sent while not connected are dropped, not queued:
/// only the post-reconnect snapshot fetch re-establishes correctness.
pub struct SessionManager {
    inner: Arc<SessionShared>,
}

struct SessionShared {
    tx: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    conn_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    stats: Mutex<SessionStats>,
}

#[derive(Default)]
struct SessionStats {
    bytes_out: u64,
    bytes_in: u64,
    messages_out: u64,
    messages_in: u64,
    last_message_at: Option<Instant>,
    last_ping_sent: Option<Instant>,
    last_ping_nonce: Option<u64>,
    last_rtt_ms: Option<f32>,
    last_disconnect_at: Option<Instant>,
    reconnect_attempts: u32,
    connected_since: Option<Instant>,
}

/// Point-in-time view of the transfer stats, for the badge and the CLI
/// status line.
pub struct SessionStatsSnapshot {
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub messages_out: u64,
    pub messages_in: u64,
    pub last_rtt_ms: Option<f32>,
    pub last_message_age: Option<f32>,
    pub connected_duration: Option<f32>,
    pub reconnect_attempts: u32,
    pub last_disconnect_secs: Option<f32>,
}

impl SessionManager {
    /// Open the sync channel for a party and start the supervisor that owns
    /// reconnection. `on_frame` runs on the reader task, so frames are
    /// handled strictly in local arrival order.
    pub fn connect<F>(
        config: &ClientConfig,
        party_id: &str,
        token: &str,
        on_frame: F,
    ) -> Result<Self, ClientError>
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        let url = config.ws_url(party_id, token)?;
        let (conn_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let inner = Arc::new(SessionShared {
            tx: Mutex::new(None),
            conn_tx,
            shutdown_tx,
            stats: Mutex::new(SessionStats::default()),
        });

        tokio::spawn(supervise(
            Arc::clone(&inner),
            url,
            Arc::new(on_frame),
            config.reconnect_delay,
            config.keepalive_interval,
        ));

        Ok(Self { inner })
    }

    /// Queue one frame to the socket. A no-op while not connected: commands
    /// are not replayed after a reconnect.
    pub fn send(&self, frame: &Frame) -> Result<(), ClientError> {
        let json = protocol::encode(frame)?;
        let Some(tx) = self.inner.tx.lock().clone() else {
            debug!("not connected, dropping outbound frame");
            return Ok(());
        };
        let bytes = json.len() as u64;
        if tx.send(WsMessage::Text(json.into())).is_err() {
            debug!("socket writer gone, dropping outbound frame");
            return Ok(());
        }
        self.inner.record_outgoing(bytes);
        Ok(())
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.conn_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.conn_tx.borrow()
    }

    /// Tear the session down. Terminal: cancels any pending reconnect timer
    /// and no further attempts are scheduled.
    pub fn close(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        self.inner.clear_transport();
        self.inner.set_state(ConnectionState::Disconnected);
    }

    pub fn stats_snapshot(&self) -> SessionStatsSnapshot {
        self.inner.snapshot()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close();
    }
}

async fn supervise<F>(
    shared: Arc<SessionShared>,
    url: String,
    handler: Arc<F>,
    reconnect_delay: Duration,
    keepalive_interval: Duration,
) where
    F: Fn(Frame) + Send + Sync + 'static,
{
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        shared.set_state(ConnectionState::Connecting);

        let outcome = tokio::select! {
            res = connect_async(url.as_str()) => res,
            _ = shutdown_rx.changed() => break,
        };

        match outcome {
            Ok((stream, _)) => {
                attempt = 0;
                shared.mark_connected();
                shared.set_state(ConnectionState::Connected);
                info!("sync channel open");

                let closed = attach_transport(
                    &shared,
                    stream,
                    Arc::clone(&handler),
                    keepalive_interval,
                );
                tokio::select! {
                    _ = closed => {
                        shared.mark_disconnected();
                        warn!("sync channel lost");
                    }
                    _ = shutdown_rx.changed() => {
                        shared.clear_transport();
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("failed to open sync channel: {e}");
            }
        }

        attempt += 1;
        shared.record_reconnect_attempt();
        shared.set_state(ConnectionState::Reconnecting { attempt });
        tokio::select! {
            _ = sleep(reconnect_delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    shared.clear_transport();
    shared.set_state(ConnectionState::Disconnected);
}

/// Wire one live socket into reader/writer/keep-alive tasks. The returned
/// receiver resolves when either half of the transport dies.
fn attach_transport<F>(
    shared: &Arc<SessionShared>,
    stream: WsStream,
    handler: Arc<F>,
    keepalive_interval: Duration,
) -> oneshot::Receiver<()>
where
    F: Fn(Frame) + Send + Sync + 'static,
{
    let (mut ws_sender, mut ws_receiver) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    *shared.tx.lock() = Some(tx);

    let (closed_tx, closed_rx) = oneshot::channel();
    let closed_signal = Arc::new(Mutex::new(Some(closed_tx)));

    // Writer task
    let send_shared = Arc::clone(shared);
    let send_signal = Arc::clone(&closed_signal);
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
        send_shared.clear_transport();
        if let Some(tx) = send_signal.lock().take() {
            let _ = tx.send(());
        }
    });

    // Reader task; the frame handler runs inline here, which is what keeps
    // processing in strict arrival order.
    let recv_shared = Arc::clone(shared);
    let recv_signal = Arc::clone(&closed_signal);
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = ws_receiver.next() => msg,
                _ = shutdown_rx.changed() => break,
            };
            match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    recv_shared.record_incoming(text.len() as u64);
                    match protocol::decode(&text) {
                        Ok(frame) => handler(frame),
                        Err(e) => warn!("dropping inbound frame: {e}"),
                    }
                }
                Some(Ok(WsMessage::Pong(payload))) => {
                    recv_shared.handle_ws_pong(&payload);
                }
                Some(Ok(WsMessage::Close(_))) => break,
                Some(Err(e)) => {
                    warn!("sync channel error: {e}");
                    break;
                }
                None => break,
                Some(Ok(_)) => {}
            }
        }
        recv_shared.clear_transport();
        if let Some(tx) = recv_signal.lock().take() {
            let _ = tx.send(());
        }
    });

    // Keep-alive pings
    let ping_shared = Arc::clone(shared);
    tokio::spawn(async move {
        loop {
            sleep(keepalive_interval).await;
            if ping_shared.send_keepalive().is_err() {
                break;
            }
        }
    });

    closed_rx
}

impl SessionShared {
    fn set_state(&self, state: ConnectionState) {
        self.conn_tx.send_replace(state);
    }

    fn record_outgoing(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_out += bytes;
        stats.messages_out += 1;
        stats.last_message_at = Some(Instant::now());
    }

    fn record_incoming(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_in += bytes;
        stats.messages_in += 1;
        stats.last_message_at = Some(Instant::now());
    }

    fn handle_ws_pong(&self, payload: &[u8]) {
        self.record_incoming(payload.len() as u64);
        if payload.len() < 8 {
            return;
        }
        let mut nonce_bytes = [0u8; 8];
        nonce_bytes.copy_from_slice(&payload[..8]);
        let nonce = u64::from_le_bytes(nonce_bytes);

        let mut stats = self.stats.lock();
        if stats.last_ping_nonce == Some(nonce) {
            if let Some(sent) = stats.last_ping_sent {
                stats.last_rtt_ms = Some(sent.elapsed().as_secs_f32() * 1000.0);
            }
            stats.last_ping_nonce = None;
            stats.last_ping_sent = None;
        }
    }

    fn send_keepalive(&self) -> Result<(), ()> {
        let nonce = Uuid::new_v4().as_u128() as u64;
        {
            let mut stats = self.stats.lock();
            stats.last_ping_nonce = Some(nonce);
            stats.last_ping_sent = Some(Instant::now());
        }

        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&nonce.to_le_bytes());
        payload.extend_from_slice(&unix_millis().to_le_bytes());
        self.record_outgoing(payload.len() as u64);

        if let Some(tx) = self.tx.lock().clone() {
            tx.send(WsMessage::Ping(payload.into())).map_err(|_| ())
        } else {
            Err(())
        }
    }

    fn clear_transport(&self) {
        *self.tx.lock() = None;
        let mut stats = self.stats.lock();
        stats.last_ping_nonce = None;
        stats.last_ping_sent = None;
    }

    fn mark_connected(&self) {
        let mut stats = self.stats.lock();
        stats.connected_since = Some(Instant::now());
    }

    fn mark_disconnected(&self) {
        let mut stats = self.stats.lock();
        stats.connected_since = None;
        stats.last_disconnect_at = Some(Instant::now());
    }

    fn record_reconnect_attempt(&self) {
        self.stats.lock().reconnect_attempts += 1;
    }

    fn snapshot(&self) -> SessionStatsSnapshot {
        let stats = self.stats.lock();
        SessionStatsSnapshot {
            bytes_out: stats.bytes_out,
            bytes_in: stats.bytes_in,
            messages_out: stats.messages_out,
            messages_in: stats.messages_in,
            last_rtt_ms: stats.last_rtt_ms,
            last_message_age: stats
                .last_message_at
                .map(|inst| inst.elapsed().as_secs_f32()),
            connected_duration: stats
                .connected_since
                .map(|inst| inst.elapsed().as_secs_f32()),
            reconnect_attempts: stats.reconnect_attempts,
            last_disconnect_secs: stats
                .last_disconnect_at
                .map(|inst| inst.elapsed().as_secs_f32()),
        }
    }
}
