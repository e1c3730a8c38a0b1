//! Device session clients
//!
//! Chargers and energy storage keep one WebSocket open per device
//! ([`websocket_client`]); CT meters and smart plugs are polled over HTTP RPC
//! ([`rpc_client`]). Both feed a [`crate::state::DeviceStateStore`].

pub mod envelope;
pub mod rpc_client;
pub mod websocket_client;

pub use envelope::{CommandId, ControlRecord, Envelope, Verb};
pub use rpc_client::RpcClient;
pub use websocket_client::EwayWebSocketClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of one session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Opening the socket, or waiting between reconnect attempts
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Receives every decoded inbound envelope, inline on the read loop
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope);
}

/// Persistent device session
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Open the session
    async fn connect(&self) -> Result<()>;

    /// Close the session; safe to call repeatedly
    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    async fn state(&self) -> ConnectionState;

    /// Send one envelope
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Liveness check; never raises
    async fn ping(&self) -> bool;
}
