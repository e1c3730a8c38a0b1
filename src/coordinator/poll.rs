//! HTTP polling session shared by CT meters and smart plugs
//!
//! A [`PollTracker`] decides what a failed poll means: before the first
//! success it counts initial attempts (with a delay between them); once the
//! device has answered it counts consecutive failures. Neither path retries
//! inside one refresh call; the caller's scheduler owns the cadence.

use crate::client::RpcClient;
use crate::config::HttpPollConfig;
use crate::device::DeviceIdentity;
use crate::error::{EwayError, Result};
use crate::state::DeviceStateStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Link state of a polled device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No poll has ever succeeded
    #[default]
    NeverConnected,
    Connected,
    /// Was connected, then hit the consecutive-failure bound
    Degraded,
}

/// Outcome of recording one failed poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep serving the last snapshot, optionally after waiting
    Tolerated { retry_delay: Option<Duration> },
    /// Bound exceeded; surface as an update failure
    Exhausted(String),
}

/// Failure bookkeeping for one polled device
#[derive(Debug, Clone)]
pub struct PollTracker {
    state: LinkState,
    failures: u32,
    initial_attempts: u32,
    max_failures: u32,
    max_initial_attempts: u32,
    initial_retry_delay: Duration,
}

impl PollTracker {
    pub fn new(config: &HttpPollConfig) -> Self {
        Self {
            state: LinkState::NeverConnected,
            failures: 0,
            initial_attempts: 0,
            max_failures: config.max_connection_retries,
            max_initial_attempts: config.max_initial_attempts,
            initial_retry_delay: config.initial_retry_delay,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn initial_attempts(&self) -> u32 {
        self.initial_attempts
    }

    /// Record a successful poll. Returns true when the link just came up.
    pub fn record_success(&mut self) -> bool {
        self.failures = 0;
        let came_up = self.state != LinkState::Connected;
        self.state = LinkState::Connected;
        came_up
    }

    /// Record a failed poll and classify it
    pub fn record_failure(&mut self, cause: &EwayError) -> Verdict {
        match self.state {
            LinkState::NeverConnected => {
                self.initial_attempts += 1;
                if self.initial_attempts > self.max_initial_attempts {
                    Verdict::Exhausted(format!(
                        "connection failed after {} attempts: {cause}",
                        self.initial_attempts
                    ))
                } else {
                    Verdict::Tolerated {
                        retry_delay: Some(self.initial_retry_delay),
                    }
                }
            }
            LinkState::Connected | LinkState::Degraded => {
                self.failures += 1;
                if self.failures > self.max_failures {
                    self.state = LinkState::Degraded;
                    Verdict::Exhausted(format!(
                        "{} consecutive failures: {cause}",
                        self.failures
                    ))
                } else {
                    if self.failures == self.max_failures {
                        self.state = LinkState::Degraded;
                    }
                    Verdict::Tolerated { retry_delay: None }
                }
            }
        }
    }
}

/// One polled device: RPC client, failure tracker and state store
pub struct HttpPollSession {
    identity: DeviceIdentity,
    config: HttpPollConfig,
    rpc: RpcClient,
    store: Arc<DeviceStateStore>,
    /// Held for a whole refresh or command; doubles as the coordinator lock
    tracker: Mutex<PollTracker>,
}

impl HttpPollSession {
    pub fn new(identity: DeviceIdentity, config: HttpPollConfig) -> Result<Self> {
        let rpc = RpcClient::new(&identity)?;
        Ok(Self::with_client(identity, config, rpc))
    }

    /// Build a session around an existing RPC client
    pub fn with_client(identity: DeviceIdentity, config: HttpPollConfig, rpc: RpcClient) -> Self {
        let tracker = Mutex::new(PollTracker::new(&config));
        Self {
            identity,
            config,
            rpc,
            store: Arc::new(DeviceStateStore::new()),
            tracker,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &HttpPollConfig {
        &self.config
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn store(&self) -> &Arc<DeviceStateStore> {
        &self.store
    }

    /// Acquire the session lock
    pub async fn lock(&self) -> MutexGuard<'_, PollTracker> {
        self.tracker.lock().await
    }

    pub async fn link_state(&self) -> LinkState {
        self.tracker.lock().await.state()
    }

    pub async fn is_connected(&self) -> bool {
        self.tracker.lock().await.is_connected()
    }

    /// Poll `method?id=0` once.
    ///
    /// Returns the body on success, `None` when the failure is within the
    /// tracker's bounds (the caller keeps its last snapshot), and
    /// [`EwayError::UpdateFailed`] once a bound is exceeded.
    pub async fn poll(&self, tracker: &mut PollTracker, method: &str) -> Result<Option<Value>> {
        let host = &self.identity.host;
        match self
            .rpc
            .call(method, &[("id", "0")], self.config.request_timeout)
            .await
        {
            Ok(body) => {
                if tracker.record_success() {
                    info!(host = %host, "✅ Connected to {} {}", self.identity.family, host);
                }
                debug!(host = %host, "{method} -> {body}");
                Ok(Some(body))
            }
            Err(e) => {
                let was_connected = tracker.is_connected();
                let verdict = tracker.record_failure(&e);
                warn!(
                    host = %host,
                    state = ?tracker.state(),
                    failures = tracker.failures(),
                    initial_attempts = tracker.initial_attempts(),
                    "{method} failed: {e}"
                );
                if was_connected && tracker.state() == LinkState::Degraded {
                    warn!(host = %host, "{} {} marked disconnected", self.identity.family, host);
                }

                match verdict {
                    Verdict::Tolerated { retry_delay } => {
                        if let Some(delay) = retry_delay {
                            tokio::time::sleep(delay).await;
                        }
                        Ok(None)
                    }
                    Verdict::Exhausted(reason) => Err(EwayError::update_failed(format!(
                        "{} {}: {reason}",
                        self.identity.family, host
                    ))),
                }
            }
        }
    }

    /// Issue a user command with the command timeout; failures propagate
    pub async fn command(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.rpc
            .call(method, params, self.config.command_timeout)
            .await
            .map_err(|e| {
                error!(
                    host = %self.identity.host,
                    "Command {method} {params:?} failed: {e}"
                );
                e
            })
    }

    /// Bounded connectivity test: a few attempts with a fixed delay between
    pub async fn probe(&self, method: &str) -> bool {
        let attempts = self.config.probe_attempts.max(1);
        for attempt in 1..=attempts {
            match self
                .rpc
                .call(method, &[("id", "0")], self.config.request_timeout)
                .await
            {
                Ok(_) => {
                    info!(host = %self.identity.host, "Connection test successful");
                    return true;
                }
                Err(e) => warn!(
                    host = %self.identity.host,
                    "Connection test failed (attempt {attempt}/{attempts}): {e}"
                ),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.probe_delay).await;
            }
        }
        error!(
            host = %self.identity.host,
            "Connection test failed after {attempts} attempts"
        );
        false
    }
}
