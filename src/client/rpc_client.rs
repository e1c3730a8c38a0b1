//! HTTP RPC client for CT meters and smart plugs
//!
//! Devices expose `GET /rpc/<Method>?<params>` endpoints returning JSON. One
//! pooled [`reqwest::Client`] is built per session and reused for every call.

use crate::device::{DeviceIdentity, Protocol};
use crate::error::{EwayError, Result};
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP RPC client bound to one device
#[derive(Debug, Clone)]
pub struct RpcClient {
    /// HTTP client instance
    client: Client,

    /// `http://<host>[:port]/`
    base_url: Url,
}

impl RpcClient {
    /// Create a new RPC client
    pub fn new(identity: &DeviceIdentity) -> Result<Self> {
        if identity.family.protocol() != Protocol::HttpRpc {
            return Err(EwayError::invalid_configuration(format!(
                "{} devices do not speak HTTP RPC",
                identity.family
            )));
        }

        let base_url = Url::parse(&identity.http_base_url()).map_err(|e| {
            EwayError::invalid_configuration(format!("Invalid host {}: {e}", identity.host))
        })?;
        Self::with_base_url(base_url)
    }

    /// Create a client against an explicit base URL
    pub fn with_base_url(base_url: Url) -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(format!("eway-rust/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EwayError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build URL for an RPC method
    fn build_url(&self, method: &str) -> Result<Url> {
        self.base_url
            .join(&format!("rpc/{method}"))
            .map_err(|e| {
                EwayError::invalid_configuration(format!("Invalid RPC method {method}: {e}"))
            })
    }

    /// Call `method` with query `params`, bounded by `timeout`.
    ///
    /// Non-2xx answers become [`EwayError::HttpStatus`]; transport failures
    /// become [`EwayError::Timeout`] or [`EwayError::Http`].
    pub async fn call(
        &self,
        method: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value> {
        let url = self.build_url(method)?;
        debug!("RPC call {url} {params:?}");

        let response = self
            .client
            .get(url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EwayError::timeout(format!("{method} timed out after {timeout:?}"))
                } else {
                    EwayError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EwayError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| EwayError::decode_failed(format!("{method} returned invalid JSON: {e}")))
    }
}
