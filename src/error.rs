//! Error types for Eway device sessions
//!
//! Every network call maps its failure onto one of these kinds.

use thiserror::Error;

/// Result type alias for Eway operations
pub type Result<T> = std::result::Result<T, EwayError>;

/// Error kinds surfaced by sessions, coordinators and the router
#[derive(Error, Debug)]
pub enum EwayError {
    /// Missing identity component or otherwise unusable device configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Socket could not be opened (timeout, refused, handshake error)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation requires an open session
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Writing a frame to the socket failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// A single inbound frame could not be decoded
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// Refresh cycle failed; the scheduler marks the device unavailable
    #[error("Update failed: {0}")]
    UpdateFailed(String),

    /// Operation exceeded its fixed timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Device answered an RPC call with a non-2xx status
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file or environment errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EwayError {
    pub fn invalid_configuration<S: Into<String>>(msg: S) -> Self {
        EwayError::InvalidConfiguration(msg.into())
    }

    pub fn connection_failed<S: Into<String>>(msg: S) -> Self {
        EwayError::ConnectionFailed(msg.into())
    }

    pub fn not_connected<S: Into<String>>(msg: S) -> Self {
        EwayError::NotConnected(msg.into())
    }

    pub fn send_failed<S: Into<String>>(msg: S) -> Self {
        EwayError::SendFailed(msg.into())
    }

    pub fn decode_failed<S: Into<String>>(msg: S) -> Self {
        EwayError::DecodeFailed(msg.into())
    }

    pub fn update_failed<S: Into<String>>(msg: S) -> Self {
        EwayError::UpdateFailed(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        EwayError::Timeout(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        EwayError::Config(msg.into())
    }

    /// Wrap any error as an `UpdateFailed` carrying a human-readable cause
    pub fn into_update_failed(self, context: &str) -> Self {
        match self {
            EwayError::UpdateFailed(_) => self,
            other => EwayError::UpdateFailed(format!("{context}: {other}")),
        }
    }

    /// Check if error is recoverable by reconnecting or retrying later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EwayError::ConnectionFailed(_)
                | EwayError::NotConnected(_)
                | EwayError::SendFailed(_)
                | EwayError::Timeout(_)
                | EwayError::Http(_)
                | EwayError::HttpStatus { .. }
        )
    }

    /// Transport-level failures, recoverable via reconnect
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EwayError::ConnectionFailed(_) | EwayError::NotConnected(_) | EwayError::SendFailed(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EwayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        EwayError::SendFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EwayError::invalid_configuration("device_id is empty");
        assert_eq!(err.to_string(), "Invalid configuration: device_id is empty");

        let err = EwayError::HttpStatus {
            status: 503,
            body: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP status 503: busy");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EwayError::connection_failed("refused").is_retryable());
        assert!(EwayError::not_connected("closed").is_transport());
        assert!(!EwayError::invalid_configuration("x").is_retryable());
        assert!(!EwayError::decode_failed("x").is_transport());
    }

    #[test]
    fn test_into_update_failed_keeps_cause() {
        let err = EwayError::connection_failed("refused").into_update_failed("refresh");
        match err {
            EwayError::UpdateFailed(msg) => {
                assert!(msg.contains("refresh"));
                assert!(msg.contains("refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = EwayError::update_failed("already").into_update_failed("refresh");
        assert_eq!(err.to_string(), "Update failed: already");
    }
}
