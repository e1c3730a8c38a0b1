//! Eway device session layer
//!
//! Talks to Eway chargers, energy storage units, CT meters and smart plugs on
//! the local network and keeps a normalized snapshot of each device's state.
//!
//! # Features
//!
//! - Persistent WebSocket sessions with automatic reconnect (chargers, storage)
//! - Topic-suffix routing of device messages into stable snapshot keys
//! - HTTP RPC polling with bounded failure tracking (CT meters, smart plugs)
//! - Charger control commands and CT/plug configuration commands
//! - Firmware observations published as events for an external registry
//! - Discovery name parsing and an injectable discovery cache

pub mod client;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod readings;
pub mod registry;
pub mod router;
pub mod state;

// Re-export main types for convenience
pub use client::{ConnectionState, DeviceSession, Envelope, EwayWebSocketClient, RpcClient};
pub use config::EwayConfig;
pub use coordinator::{
    build_coordinator, ChargerCoordinator, Coordinator, CtCoordinator, SmartPlugCoordinator,
};
pub use device::{DeviceFamily, DeviceIdentity, Protocol};
pub use error::{EwayError, Result};
pub use readings::ReadingKind;
pub use state::{DeviceStateStore, Snapshot, StateEvent};
