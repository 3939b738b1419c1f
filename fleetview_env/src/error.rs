//! Error types for the FleetView environment abstraction.
//!
//! Every variant is a transport fault: recoverable by failover, never fatal.

use thiserror::Error;

/// Errors that can occur while talking to the fleet backend.
#[derive(Debug, Clone, Error)]
pub enum EnvError {
    /// Could not open a connection (refused, DNS, handshake)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer closed an established connection
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The backend answered with a non-success HTTP status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Frame or body could not be read at the protocol level
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Endpoint could not be derived from the configured URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a connection failure.
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Creates a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a timeout error from a duration.
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout(after.as_millis() as u64)
    }
}
