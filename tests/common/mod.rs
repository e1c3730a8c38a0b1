//! Shared test fixtures: mock Eway devices
//!
//! [`MockEwayDevice`] is a wiremock HTTP device answering `/rpc/<Method>`
//! calls (CT meter, smart plug). [`MockWsDevice`] is an in-process WebSocket
//! device (charger, energy storage) that records every frame it receives and
//! can push frames or drop connections on demand.

#![allow(dead_code)]

use eway_rust::config::{HttpPollConfig, WebSocketConfig};
use eway_rust::{DeviceFamily, DeviceIdentity, DeviceStateStore};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Default bound for asynchronous expectations
pub const WAIT: Duration = Duration::from_secs(3);

/// Wait until `key` is present in the store
pub async fn wait_for_key(store: &DeviceStateStore, key: &str) -> bool {
    wait_for(WAIT, || async move { store.get(key).await.is_some() }).await
}

/// Poll until `check` holds or `limit` elapses
pub async fn wait_for<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// WebSocket settings scaled down for tests
pub fn fast_ws_config() -> WebSocketConfig {
    WebSocketConfig {
        connect_timeout: Duration::from_secs(2),
        ping_timeout: Duration::from_secs(1),
        close_timeout: Duration::from_secs(1),
        reconnect_interval: Duration::from_millis(50),
        max_reconnect_attempts: 3,
        scan_interval: Duration::from_secs(1),
        ..WebSocketConfig::default()
    }
}

/// HTTP poll settings scaled down for tests
pub fn fast_http_config() -> HttpPollConfig {
    HttpPollConfig {
        request_timeout: Duration::from_millis(500),
        command_timeout: Duration::from_millis(500),
        initial_retry_delay: Duration::from_millis(10),
        config_fetch_delay: Duration::from_millis(50),
        probe_delay: Duration::from_millis(10),
        ..HttpPollConfig::default()
    }
}

/// Mock HTTP RPC device
pub struct MockEwayDevice {
    pub server: MockServer,
}

impl MockEwayDevice {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn base_url(&self) -> Url {
        Url::parse(&format!("{}/", self.server.uri())).unwrap()
    }

    /// Identity pointing at this server
    pub fn identity(&self, family: DeviceFamily) -> DeviceIdentity {
        let address = self.server.address();
        DeviceIdentity::new(family, address.ip().to_string())
            .with_port(address.port())
            .with_device_sn("SN-TEST")
    }

    /// Answer `rpc_method?id=0` with `body`
    pub async fn mock_status(&self, rpc_method: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/rpc/{rpc_method}")))
            .and(query_param("id", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer `rpc_method` with an HTTP error status
    pub async fn mock_error(&self, rpc_method: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(format!("/rpc/{rpc_method}")))
            .respond_with(ResponseTemplate::new(status).set_body_string("device busy"))
            .mount(&self.server)
            .await;
    }

    /// Answer `rpc_method` with `body` exactly `times` times
    pub async fn mock_status_times(&self, rpc_method: &str, body: Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/rpc/{rpc_method}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Requests received for `rpc_method`
    pub async fn calls(&self, rpc_method: &str) -> Vec<wiremock::Request> {
        let wanted = format!("/rpc/{rpc_method}");
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == wanted)
            .collect()
    }

    pub async fn reset(&self) {
        self.server.reset().await;
    }
}

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Drop,
}

/// In-process WebSocket device
pub struct MockWsDevice {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockWsDevice {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    /// Listen on a specific address, e.g. to bring a dropped device back
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (control, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let received = Arc::clone(&received);
            let control = control.clone();
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(ws, Arc::clone(&received), control.subscribe()));
                }
            })
        };

        Self {
            addr,
            received,
            control,
            connections,
            accept_task,
        }
    }

    /// Charger identity pointing at this device
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(DeviceFamily::Charger, self.addr.ip().to_string())
            .with_port(self.addr.port())
            .with_device_id("ABC")
            .with_device_sn("123")
    }

    /// Wait until at least `n` frames have arrived
    pub async fn wait_for_frames(&self, n: usize) -> bool {
        wait_for(WAIT, || async move { self.received.lock().await.len() >= n }).await
    }

    /// Wait until `n` connections have been accepted
    pub async fn wait_for_connections(&self, n: usize) -> bool {
        wait_for(WAIT, || async move { self.connections() >= n }).await
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Frames received so far, parsed as JSON
    pub async fn received(&self) -> Vec<Value> {
        self.received.lock().await.clone()
    }

    /// Topics received so far
    pub async fn received_topics(&self) -> Vec<String> {
        self.received()
            .await
            .iter()
            .filter_map(|f| f.get("topic").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Send a raw text frame to every open connection
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.control.send(Control::Push(text.into()));
    }

    /// Send `{"topic", "payload"}` to every open connection
    pub fn push(&self, topic: &str, payload: Value) {
        self.push_raw(serde_json::json!({ "topic": topic, "payload": payload }).to_string());
    }

    /// Drop every open connection without a close handshake
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Drop);
    }
}

impl Drop for MockWsDevice {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.control.send(Control::Drop);
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    received: Arc<Mutex<Vec<Value>>>,
    mut control: broadcast::Receiver<Control>,
) {
    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
                    received.lock().await.push(value);
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = control.recv() => match command {
                Ok(Control::Push(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Control::Drop) | Err(_) => break,
            },
        }
    }
}
