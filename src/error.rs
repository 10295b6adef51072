//! Error definitions shared by the bridge components

use thiserror::Error;

/// Error types for the Apex ⇄ MQTT bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Controller or broker unreachable, timed out, or rejected a request
    #[error("Transport error: {0}")]
    Transport(String),

    /// Missing or malformed setting detected at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Two consecutive polls disagree on the set of outlets or probes,
    /// or the controller reported a value outside the known vocabulary
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// A background task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl BridgeError {
    /// True for failures a later poll or publish can recover from
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Transport(_))
    }
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(e: rumqttc::ClientError) -> Self {
        BridgeError::Transport(format!("MQTT client request failed: {}", e))
    }
}

impl From<tokio::time::error::Elapsed> for BridgeError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        BridgeError::Transport(format!("Operation timed out: {}", e))
    }
}
