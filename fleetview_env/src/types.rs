//! Common types for the FleetView environment abstraction.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};

/// Backend addresses for one fleet.
///
/// Holds the streaming URL and both polling URLs so the transport manager can
/// fail over without re-deriving anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// WebSocket URL for live updates
    pub stream_url: String,

    /// REST URL returning the full robot-state map
    pub status_url: String,

    /// REST URL returning the zone list
    pub zones_url: String,
}

impl Endpoint {
    /// Path of the streaming channel relative to the backend base URL.
    pub const STREAM_PATH: &'static str = "/ws/fleet";
    /// Path of the robot status endpoint.
    pub const STATUS_PATH: &'static str = "/api/simulation/status";
    /// Path of the zones endpoint.
    pub const ZONES_PATH: &'static str = "/api/zones";

    /// Derives all three URLs from an `http(s)://host[:port][/prefix]` base.
    pub fn from_base(base: &str) -> Result<Self, EnvError> {
        let base = base.trim().trim_end_matches('/');
        let stream_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(EnvError::InvalidEndpoint(format!(
                "expected http:// or https:// base, got '{}'",
                base
            )));
        };

        Ok(Self {
            stream_url: format!("{}{}", stream_base, Self::STREAM_PATH),
            status_url: format!("{}{}", base, Self::STATUS_PATH),
            zones_url: format!("{}{}", base, Self::ZONES_PATH),
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stream_url)
    }
}

/// Handle to a spawned background task.
///
/// Dropping the handle detaches the task; `abort` cancels it at its next
/// suspension point.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    abort: tokio::task::AbortHandle,
}

impl TaskHandle {
    /// Wraps a tokio abort handle.
    pub fn new(name: impl Into<String>, abort: tokio::task::AbortHandle) -> Self {
        Self {
            name: name.into(),
            abort,
        }
    }

    /// Returns the task name (for logging).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancels the task. Idempotent.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Returns true once the task has completed or been aborted.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_http_base() {
        let endpoint = Endpoint::from_base("http://fleet.local:8000/").unwrap();
        assert_eq!(endpoint.stream_url, "ws://fleet.local:8000/ws/fleet");
        assert_eq!(endpoint.status_url, "http://fleet.local:8000/api/simulation/status");
        assert_eq!(endpoint.zones_url, "http://fleet.local:8000/api/zones");
    }

    #[test]
    fn test_endpoint_from_https_base() {
        let endpoint = Endpoint::from_base("https://ops.example.com/tenant").unwrap();
        assert_eq!(endpoint.stream_url, "wss://ops.example.com/tenant/ws/fleet");
    }

    #[test]
    fn test_endpoint_rejects_missing_scheme() {
        assert!(matches!(
            Endpoint::from_base("fleet.local:8000"),
            Err(EnvError::InvalidEndpoint(_))
        ));
    }
}
