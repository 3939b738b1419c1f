//! Backend transport abstraction for the fleet data feed.

use crate::error::EnvError;
use crate::types::Endpoint;
use async_trait::async_trait;

/// Opens streaming sessions against the fleet backend.
///
/// # Implementations
///
/// - **Production**: `WsConnector` (WebSocket text frames)
/// - **Simulation**: scripted sessions with injectable faults
///
/// # Session Flow
///
/// ```text
/// Manager                    Connector                  Backend
///   |                           |                          |
///   |-- connect(endpoint) ----->|-- handshake ------------>|
///   |<-- Box<StreamSession> ----|                          |
///   |-- recv() ---------------->|<-- frame ----------------|
/// ```
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Opens a new streaming session.
    ///
    /// # Returns
    /// * `Ok(session)` - The stream is open and ready to deliver frames
    /// * `Err(EnvError)` - Connection refused, timed out, or handshake failed
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn StreamSession>, EnvError>;
}

/// An open streaming session delivering raw text frames.
#[async_trait]
pub trait StreamSession: Send {
    /// Receives the next text frame.
    ///
    /// # Returns
    /// * `Some(Ok(frame))` - A frame arrived
    /// * `Some(Err(e))` - The session failed mid-stream
    /// * `None` - The peer closed the session
    async fn recv(&mut self) -> Option<Result<String, EnvError>>;

    /// Closes the session. Idempotent.
    async fn close(&mut self);
}

/// Pull-based access to the fleet backend.
///
/// Both calls return the raw response body; interpretation happens at the
/// reconciler boundary, never here.
#[async_trait]
pub trait StatusPoller: Send + Sync + 'static {
    /// Fetches the full robot-state map (`GET .../simulation/status`).
    async fn fetch_status(&self, endpoint: &Endpoint) -> Result<String, EnvError>;

    /// Fetches the zone list (`GET .../zones`).
    async fn fetch_zones(&self, endpoint: &Endpoint) -> Result<String, EnvError>;
}
