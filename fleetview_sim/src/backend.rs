//! Simulated fleet backend with fault injection.
//!
//! Serves the oracle's fleet through the same traits the production
//! WebSocket and HTTP clients implement, so the engine under test cannot
//! tell the difference.

use crate::oracle::FleetOracle;
use async_trait::async_trait;
use fleetview_env::{EnvError, Endpoint, StatusPoller, StreamConnector, StreamSession};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Backend controller for fault injection and request accounting.
pub struct SimBackendController {
    stream_refused: AtomicBool,
    polls_failing: AtomicBool,
    poll_latency_ms: AtomicU64,
    /// Bumped to drop every open session
    generation: AtomicU64,

    connects: AtomicU64,
    polls: AtomicU64,
    zone_fetches: AtomicU64,
    frames_sent: AtomicU64,
    poll_times: Mutex<Vec<Instant>>,
    epoch: Instant,
}

impl SimBackendController {
    pub fn new() -> Self {
        Self {
            stream_refused: AtomicBool::new(false),
            polls_failing: AtomicBool::new(false),
            poll_latency_ms: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            zone_fetches: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            poll_times: Mutex::new(Vec::new()),
            epoch: Instant::now(),
        }
    }

    /// Refuses new stream connections.
    pub fn set_stream_refused(&self, refused: bool) {
        self.stream_refused.store(refused, Ordering::SeqCst);
    }

    /// Closes every open stream session at its next receive.
    pub fn drop_streams(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Makes status pulls answer HTTP 503.
    pub fn set_polls_failing(&self, failing: bool) {
        self.polls_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_poll_latency(&self, latency: Duration) {
        self.poll_latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn zone_fetches(&self) -> u64 {
        self.zone_fetches.load(Ordering::SeqCst)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    /// Times at which status pulls started, relative to controller creation.
    pub fn poll_times(&self) -> Vec<Duration> {
        self.poll_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|t| t.duration_since(self.epoch))
            .collect()
    }

    /// Largest gap between consecutive pulls at or after `since`.
    pub fn max_poll_gap(&self, since: Duration) -> Option<Duration> {
        let times: Vec<Duration> = self.poll_times().into_iter().filter(|t| *t >= since).collect();
        times.windows(2).map(|w| w[1] - w[0]).max()
    }
}

impl Default for SimBackendController {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming and polling access to one simulated fleet.
#[derive(Clone)]
pub struct SimBackend {
    oracle: Arc<Mutex<FleetOracle>>,
    controller: Arc<SimBackendController>,
    /// Interval between streamed snapshots
    frame_interval: Duration,
}

impl SimBackend {
    pub fn new(oracle: Arc<Mutex<FleetOracle>>, controller: Arc<SimBackendController>) -> Self {
        Self {
            oracle,
            controller,
            frame_interval: Duration::from_millis(100),
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn controller(&self) -> &Arc<SimBackendController> {
        &self.controller
    }

    fn with_oracle<T>(&self, f: impl FnOnce(&mut FleetOracle) -> T) -> T {
        let mut oracle = self.oracle.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut oracle)
    }
}

/// An open simulated stream.
struct SimSession {
    backend: SimBackend,
    generation: u64,
    closed: bool,
}

#[async_trait]
impl StreamSession for SimSession {
    async fn recv(&mut self) -> Option<Result<String, EnvError>> {
        if self.closed {
            return None;
        }
        tokio::time::sleep(self.backend.frame_interval).await;

        if self.backend.controller.generation.load(Ordering::SeqCst) != self.generation {
            self.closed = true;
            return Some(Err(EnvError::ConnectionClosed("stream dropped by backend".to_string())));
        }

        self.backend.controller.frames_sent.fetch_add(1, Ordering::SeqCst);
        Some(Ok(self.backend.with_oracle(|o| o.stream_snapshot())))
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[async_trait]
impl StreamConnector for SimBackend {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn StreamSession>, EnvError> {
        self.controller.connects.fetch_add(1, Ordering::SeqCst);
        if self.controller.stream_refused.load(Ordering::SeqCst) {
            return Err(EnvError::connect("stream refused by backend"));
        }
        Ok(Box::new(SimSession {
            backend: self.clone(),
            generation: self.controller.generation.load(Ordering::SeqCst),
            closed: false,
        }))
    }
}

#[async_trait]
impl StatusPoller for SimBackend {
    async fn fetch_status(&self, _endpoint: &Endpoint) -> Result<String, EnvError> {
        self.controller.polls.fetch_add(1, Ordering::SeqCst);
        self.controller
            .poll_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Instant::now());

        let latency = self.controller.poll_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.controller.polls_failing.load(Ordering::SeqCst) {
            return Err(EnvError::HttpStatus(503));
        }
        Ok(self.with_oracle(|o| o.status_body()))
    }

    async fn fetch_zones(&self, _endpoint: &Endpoint) -> Result<String, EnvError> {
        self.controller.zone_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.with_oracle(|o| o.zones_body()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SimBackend {
        let oracle = Arc::new(Mutex::new(FleetOracle::with_fleet(42, 3, 1)));
        SimBackend::new(oracle, Arc::new(SimBackendController::new()))
    }

    fn endpoint() -> Endpoint {
        Endpoint::from_base("http://sim.local").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_stream_counts_attempts() {
        let backend = backend();
        backend.controller().set_stream_refused(true);
        assert!(backend.connect(&endpoint()).await.is_err());
        assert_eq!(backend.controller().connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stream_reports_closed() {
        let backend = backend();
        let mut session = backend.connect(&endpoint()).await.unwrap();
        assert!(matches!(session.recv().await, Some(Ok(_))));

        backend.controller().drop_streams();
        assert!(matches!(session.recv().await, Some(Err(EnvError::ConnectionClosed(_)))));
        assert!(session.recv().await.is_none());
        assert_eq!(backend.controller().frames_sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_polls_and_gap_tracking() {
        let backend = backend();
        assert!(backend.fetch_status(&endpoint()).await.is_ok());
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        backend.controller().set_polls_failing(true);
        assert!(matches!(
            backend.fetch_status(&endpoint()).await,
            Err(EnvError::HttpStatus(503))
        ));
        assert_eq!(backend.controller().polls(), 2);
        assert_eq!(
            backend.controller().max_poll_gap(Duration::ZERO),
            Some(Duration::from_millis(2_000))
        );
    }
}
