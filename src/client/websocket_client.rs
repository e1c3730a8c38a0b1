//! WebSocket session for chargers and energy storage
//!
//! One logical connection per device. A background read task decodes every
//! inbound frame and hands it to the [`MessageHandler`] inline; when the
//! socket drops, the same task marks the session disconnected and runs the
//! bounded reconnect loop.
//!
//! Features:
//! - Bounded connect, ping and close timeouts
//! - Sequential reconnect attempts with a fixed delay and attempt cap
//! - Info and status requests issued right after every successful connect
//! - Protocol-level ping with pong correlation
//!
//! Opens are serialized: a `connect()` that lands while a reconnect loop is
//! waiting cancels that loop, and every reader carries the generation of the
//! connection it serves so a superseded reader never touches the live socket.

use crate::client::{ConnectionState, DeviceSession, Envelope, MessageHandler};
use crate::config::WebSocketConfig;
use crate::device::{DeviceIdentity, Protocol};
use crate::error::{EwayError, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// WebSocket connection statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSocketStats {
    /// Total frames received
    pub messages_received: u64,

    /// Frames dropped because they did not decode
    pub decode_failures: u64,

    /// Automatic reconnect attempts made
    pub reconnection_attempts: u32,

    /// When the current connection was opened
    pub connection_start: Option<chrono::DateTime<chrono::Utc>>,

    /// Last frame received timestamp
    pub last_message: Option<chrono::DateTime<chrono::Utc>>,

    /// Bytes received
    pub bytes_received: u64,
}

struct Inner {
    identity: DeviceIdentity,
    config: WebSocketConfig,
    handler: Arc<dyn MessageHandler>,
    state: RwLock<ConnectionState>,
    sink: Mutex<Option<WsSink>>,
    /// Swapped without awaiting so a cancelled task can never orphan a reader
    read_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Held for the whole of one open
    open_lock: Mutex<()>,
    /// Bumped by every open and close
    generation: AtomicU64,
    reconnect_attempts: AtomicU32,
    /// Set by `disconnect()`, cleared by `connect()`
    closing: AtomicBool,
    /// Sequence number carried by the last ping sent
    ping_seq: AtomicU64,
    /// Highest ping sequence the device has echoed back
    pongs: watch::Sender<u64>,
    stats: RwLock<WebSocketStats>,
}

/// WebSocket client for one Eway device
#[derive(Clone)]
pub struct EwayWebSocketClient {
    inner: Arc<Inner>,
}

impl EwayWebSocketClient {
    /// Create a client; nothing is opened until [`DeviceSession::connect`]
    pub fn new(
        identity: DeviceIdentity,
        config: WebSocketConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        if identity.family.protocol() != Protocol::WebSocket {
            return Err(EwayError::invalid_configuration(format!(
                "{} devices are not reachable over WebSocket",
                identity.family
            )));
        }
        if identity.host.is_empty() {
            return Err(EwayError::invalid_configuration("host is empty"));
        }

        let (pongs, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                identity,
                config,
                handler,
                state: RwLock::new(ConnectionState::Disconnected),
                sink: Mutex::new(None),
                read_task: std::sync::Mutex::new(None),
                open_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
                closing: AtomicBool::new(false),
                ping_seq: AtomicU64::new(0),
                pongs,
                stats: RwLock::new(WebSocketStats::default()),
            }),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub async fn get_stats(&self) -> WebSocketStats {
        self.inner.stats.read().await.clone()
    }

    /// Automatic reconnect attempts since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Send an `info/get` request
    pub async fn get_device_info(&self) -> Result<()> {
        let envelope = Envelope::get_device_info(&self.inner.identity)?;
        self.inner.send(envelope).await
    }

    /// Send a `property/get` request
    pub async fn get_device_status(&self) -> Result<()> {
        let envelope = Envelope::get_device_status(&self.inner.identity)?;
        self.inner.send(envelope).await
    }
}

impl Inner {
    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    fn replace_read_task(&self, handle: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        match self.read_task.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, handle),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), handle),
        }
    }

    /// Open the socket and start the read task.
    ///
    /// `reconnecting` is set when the caller is the reader in the task slot;
    /// any other caller cancels whatever reader or reconnect loop is parked
    /// there before dialing.
    async fn open(self: &Arc<Self>, reconnecting: bool) -> Result<()> {
        let opening = self.open_lock.lock().await;
        if self.is_connected().await {
            return Ok(());
        }
        if reconnecting {
            if self.closing.load(Ordering::SeqCst) {
                return Err(EwayError::not_connected(format!(
                    "{} closed while reconnecting",
                    self.identity
                )));
            }
        } else if let Some(stale) = self.replace_read_task(None) {
            stale.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let url = self.identity.ws_url();
        self.set_state(ConnectionState::Connecting).await;
        info!(device = %self.identity, "Connecting WebSocket to {url}");

        let stream = match timeout(self.config.connect_timeout, connect_async(url.as_str())).await
        {
            Ok(Ok((stream, response))) => {
                debug!("WebSocket connected, response: {:?}", response.status());
                stream
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected).await;
                return Err(EwayError::connection_failed(format!(
                    "WebSocket connection to {url} failed: {e}"
                )));
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected).await;
                return Err(EwayError::connection_failed(format!(
                    "WebSocket connection to {url} timed out after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);
        self.set_state(ConnectionState::Connected).await;
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.stats.write().await.connection_start = Some(chrono::Utc::now());

        let handle = tokio::spawn(read_loop(Arc::clone(self), source, generation));
        // Only a reconnecting reader's own handle can still be in the slot
        drop(self.replace_read_task(Some(handle)));
        drop(opening);

        info!(device = %self.identity, "✅ Connected to Eway device WebSocket");
        self.request_initial_snapshot().await;
        Ok(())
    }

    /// Info and status requests so consumers get data before the next refresh
    async fn request_initial_snapshot(&self) {
        if !self.identity.is_complete() {
            debug!(
                device = %self.identity,
                "Identity incomplete, skipping initial info/status requests"
            );
            return;
        }

        let requests = [
            Envelope::get_device_info(&self.identity),
            Envelope::get_device_status(&self.identity),
        ];
        for request in requests {
            let result = match request {
                Ok(envelope) => self.send(envelope).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(device = %self.identity, "Initial request failed: {e}");
            }
        }
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected().await {
            return Err(EwayError::not_connected(format!(
                "cannot send {} to {}",
                envelope.topic, self.identity
            )));
        }

        let text = envelope.encode()?;
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| EwayError::not_connected("socket already closed"))?;

        sink.send(Message::Text(text)).await.map_err(|e| {
            EwayError::send_failed(format!("sending {} failed: {e}", envelope.topic))
        })?;

        debug!(topic = %envelope.topic, "Sent message");
        Ok(())
    }

    async fn ping(&self) -> bool {
        if !self.is_connected().await {
            return false;
        }

        let seq = self.ping_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut pongs = self.pongs.subscribe();

        {
            let mut guard = self.sink.lock().await;
            let Some(sink) = guard.as_mut() else {
                return false;
            };
            if let Err(e) = sink.send(Message::Ping(seq.to_be_bytes().to_vec())).await {
                warn!(device = %self.identity, "Ping send failed: {e}");
                return false;
            }
        }

        let acked = match timeout(self.config.ping_timeout, pongs.wait_for(|last| *last >= seq)).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    device = %self.identity,
                    "No pong for ping {seq} within {:?}", self.config.ping_timeout
                );
                false
            }
        };
        acked
    }

    fn record_pong(&self, payload: &[u8]) {
        match pong_sequence(payload) {
            Some(seq) => {
                self.pongs.send_if_modified(|last| {
                    if seq > *last {
                        *last = seq;
                        true
                    } else {
                        false
                    }
                });
            }
            None => debug!(device = %self.identity, "Ignoring unsolicited pong"),
        }
    }

    async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);

        if let Some(handle) = self.replace_read_task(None) {
            handle.abort();
            // Cancellation completes before the socket is closed
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(device = %self.identity, "Read task ended abnormally: {e}");
                }
            }
        }

        // An open that was already past its checks may have parked a new reader
        let _opening = self.open_lock.lock().await;
        if let Some(late) = self.replace_read_task(None) {
            late.abort();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut sink) = self.sink.lock().await.take() {
            match timeout(self.config.close_timeout, sink.close()).await {
                Ok(Ok(())) => debug!("WebSocket closed cleanly"),
                Ok(Err(e)) => debug!("WebSocket close error: {e}"),
                Err(_) => debug!("WebSocket close timed out"),
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Handle one inbound frame; `false` ends the read loop
    async fn process_ws_message(&self, message: Message) -> bool {
        match message {
            Message::Text(text) => {
                self.route_text(&text).await;
            }
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => self.route_text(&text).await,
                Err(e) => {
                    self.stats.write().await.decode_failures += 1;
                    warn!(device = %self.identity, "Dropping non-UTF-8 binary frame: {e}");
                }
            },
            Message::Ping(_) => {
                debug!("Received ping - pong will be sent automatically by tungstenite");
            }
            Message::Pong(payload) => self.record_pong(&payload),
            Message::Close(frame) => {
                match frame {
                    Some(frame) => info!(
                        device = %self.identity,
                        "WebSocket closed by device: {} - {}", frame.code, frame.reason
                    ),
                    None => info!(device = %self.identity, "WebSocket closed by device"),
                }
                return false;
            }
            Message::Frame(_) => {}
        }
        true
    }

    async fn route_text(&self, text: &str) {
        {
            let mut stats = self.stats.write().await;
            stats.messages_received += 1;
            stats.bytes_received += text.len() as u64;
            stats.last_message = Some(chrono::Utc::now());
        }

        let decoded = match Envelope::decode_frame(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.write().await.decode_failures += 1;
                warn!(device = %self.identity, "Dropping frame: {e}");
                return;
            }
        };

        for envelope in decoded {
            match envelope {
                Ok(envelope) => {
                    debug!(topic = %envelope.topic, "Received message");
                    self.handler.handle(envelope).await;
                }
                Err(e) => {
                    self.stats.write().await.decode_failures += 1;
                    warn!(device = %self.identity, "Dropping batch element: {e}");
                }
            }
        }
    }
}

/// Pings carry a big-endian sequence number; anything else is not ours
fn pong_sequence(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

async fn read_loop(inner: Arc<Inner>, mut source: WsSource, generation: u64) {
    loop {
        match source.next().await {
            Some(Ok(message)) => {
                if !inner.process_ws_message(message).await {
                    break;
                }
            }
            Some(Err(e)) => {
                error!(device = %inner.identity, "WebSocket error: {e}");
                break;
            }
            None => {
                info!(device = %inner.identity, "WebSocket stream ended");
                break;
            }
        }
    }

    if inner.generation.load(Ordering::SeqCst) != generation {
        debug!(device = %inner.identity, "Superseded reader exiting");
        return;
    }
    inner.sink.lock().await.take();
    inner.set_state(ConnectionState::Disconnected).await;

    if inner.closing.load(Ordering::SeqCst) {
        return;
    }
    reconnect_loop(inner).await;
}

/// Sequential reconnect attempts, run on the reader that saw the close
fn reconnect_loop(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let max_attempts = inner.config.max_reconnect_attempts;

        loop {
            if inner.closing.load(Ordering::SeqCst) || inner.is_connected().await {
                return;
            }

            let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > max_attempts {
                error!(
                    device = %inner.identity,
                    "Giving up after {max_attempts} reconnect attempts; waiting for connect()"
                );
                inner.set_state(ConnectionState::Disconnected).await;
                return;
            }

            inner.set_state(ConnectionState::Connecting).await;
            inner.stats.write().await.reconnection_attempts += 1;
            warn!(
                device = %inner.identity,
                "Reconnecting in {:?} (attempt {attempt}/{max_attempts})",
                inner.config.reconnect_interval
            );
            sleep(inner.config.reconnect_interval).await;

            if inner.closing.load(Ordering::SeqCst) {
                inner.set_state(ConnectionState::Disconnected).await;
                return;
            }
            if inner.is_connected().await {
                return;
            }

            match inner.open(true).await {
                Ok(()) => return,
                Err(e) => warn!(device = %inner.identity, "Reconnect attempt {attempt} failed: {e}"),
            }
        }
    })
}

#[async_trait]
impl DeviceSession for EwayWebSocketClient {
    async fn connect(&self) -> Result<()> {
        if self.inner.is_connected().await {
            return Ok(());
        }
        self.inner.closing.store(false, Ordering::SeqCst);
        self.inner.open(false).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.close().await;
        info!(device = %self.inner.identity, "Disconnected from Eway device WebSocket");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.inner.send(envelope).await
    }

    async fn ping(&self) -> bool {
        self.inner.ping().await
    }
}
