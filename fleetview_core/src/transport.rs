//! Transport manager - one acquisition mechanism at a time.
//!
//! ```text
//!            connect ok                  frame error / close
//! Connecting ─────────▶ Live ──────────────────────────────▶ DegradedPolling
//!     │                  ▲                                        │
//!     │ connect failed   └──────────── retry ok ──────────────────┘
//!     └──────────────────────────────────────────────────────────▶│
//!                                  disconnect (any state) ──▶ Closed
//! ```
//!
//! Faults never escape this module: they downgrade the transport and are
//! reported through the connection callback.

use crate::config::TransportConfig;
use crate::model::ConnectionState;
use crate::wire::{self, FleetEvent};
use fleetview_env::{
    EnvError, Endpoint, FleetContext, StatusPoller, StreamConnector, StreamSession, TaskHandle,
};
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the connection callback receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    State(ConnectionState),
    /// Streaming failed and the first pull failed before any robot data
    /// arrived. Reported at most once per connection.
    InitialLoadFailed(String),
}

pub type EventCallback = Arc<dyn Fn(FleetEvent) + Send + Sync>;
pub type ConnectionCallback = Arc<dyn Fn(ConnectionUpdate) + Send + Sync>;

thread_local! {
    /// The gate whose callback is running on this thread, by address.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Restores the enclosing gate marker when a callback returns or unwinds.
struct Reentry {
    outer: usize,
}

impl Drop for Reentry {
    fn drop(&mut self) {
        DELIVERING.with(|current| current.set(self.outer));
    }
}

/// Callback gate shared by the handle and the transport task.
///
/// Every delivery happens under the lock, so once `close` returns no
/// callback is running and none will run again. A callback may disconnect
/// its own handle: the close is then finished by the delivering frame,
/// right after the callback returns.
struct Delivery {
    open: Mutex<bool>,
    close_requested: AtomicBool,
    on_event: EventCallback,
    on_connection_change: ConnectionCallback,
}

impl Delivery {
    fn new(on_event: EventCallback, on_connection_change: ConnectionCallback) -> Self {
        Self {
            open: Mutex::new(true),
            close_requested: AtomicBool::new(false),
            on_event,
            on_connection_change,
        }
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }

    /// Runs a callback with this gate marked as delivering on the thread.
    fn invoke(&self, callback: impl FnOnce()) {
        let outer = DELIVERING.with(|current| current.replace(self.address()));
        let _reentry = Reentry { outer };
        callback();
    }

    fn deliver(&self, callback: impl FnOnce()) -> bool {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if !*open {
            return false;
        }
        self.invoke(callback);
        if self.close_requested.load(Ordering::SeqCst) {
            *open = false;
            self.invoke(|| (self.on_connection_change)(ConnectionUpdate::State(ConnectionState::Closed)));
        }
        *open
    }

    fn event(&self, event: FleetEvent) -> bool {
        self.deliver(|| (self.on_event)(event))
    }

    fn update(&self, update: ConnectionUpdate) -> bool {
        self.deliver(|| (self.on_connection_change)(update))
    }

    fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Closes the gate; `Closed` is the final callback. Idempotent.
    fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        if DELIVERING.with(|current| current.get()) == self.address() {
            // Inside one of our own callbacks; `deliver` finishes the close
            return;
        }
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if *open {
            *open = false;
            self.invoke(|| (self.on_connection_change)(ConnectionUpdate::State(ConnectionState::Closed)));
        }
    }
}

/// Owned handle to a running connection. Dropping it disconnects.
pub struct TransportHandle {
    task: TaskHandle,
    delivery: Arc<Delivery>,
}

impl TransportHandle {
    /// Cancels the transport task and emits `Closed`. Idempotent.
    pub fn disconnect(&self) {
        self.delivery.close();
        self.task.abort();
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Starts connections against a backend pair.
pub struct TransportManager<C: FleetContext> {
    ctx: Arc<C>,
    connector: Arc<dyn StreamConnector>,
    poller: Arc<dyn StatusPoller>,
    config: TransportConfig,
}

impl<C: FleetContext> TransportManager<C> {
    pub fn new(
        ctx: Arc<C>,
        connector: Arc<dyn StreamConnector>,
        poller: Arc<dyn StatusPoller>,
        config: TransportConfig,
    ) -> Self {
        Self {
            ctx,
            connector,
            poller,
            config,
        }
    }

    /// Spawns the transport task. Streaming is attempted first.
    ///
    /// Callbacks run on the transport task one at a time. They may call
    /// `disconnect` on the returned handle; `Closed` then follows the
    /// callback and nothing is delivered after it.
    pub fn connect<E, S>(&self, endpoint: Endpoint, on_event: E, on_connection_change: S) -> TransportHandle
    where
        E: Fn(FleetEvent) + Send + Sync + 'static,
        S: Fn(ConnectionUpdate) + Send + Sync + 'static,
    {
        let delivery = Arc::new(Delivery::new(Arc::new(on_event), Arc::new(on_connection_change)));

        let task = TransportTask {
            ctx: self.ctx.clone(),
            connector: self.connector.clone(),
            poller: self.poller.clone(),
            config: self.config.clone(),
            endpoint,
            delivery: delivery.clone(),
            state: None,
            robots_delivered: false,
            initial_failure_reported: false,
        };

        let name = format!("transport:{}", task.endpoint);
        let task = self.ctx.spawn(&name, task.run());
        TransportHandle { task, delivery }
    }

    /// Same as dropping the handle.
    pub fn disconnect(&self, handle: TransportHandle) {
        handle.disconnect();
    }
}

/// State owned by one spawned connection.
struct TransportTask<C: FleetContext> {
    ctx: Arc<C>,
    connector: Arc<dyn StreamConnector>,
    poller: Arc<dyn StatusPoller>,
    config: TransportConfig,
    endpoint: Endpoint,
    delivery: Arc<Delivery>,
    state: Option<ConnectionState>,
    robots_delivered: bool,
    initial_failure_reported: bool,
}

/// Why a live stream ended.
enum StreamEnd {
    Fault(String),
    Cancelled,
}

impl<C: FleetContext> TransportTask<C> {
    async fn run(mut self) {
        if !self.transition(ConnectionState::Connecting) {
            return;
        }
        if !self.refresh_zones().await {
            return;
        }

        let mut attempt = self.open_stream().await;
        loop {
            match attempt {
                Ok(mut session) => {
                    if !self.transition(ConnectionState::Live) {
                        session.close().await;
                        return;
                    }
                    let end = self.pump(session.as_mut()).await;
                    session.close().await;
                    match end {
                        StreamEnd::Cancelled => return,
                        StreamEnd::Fault(reason) => {
                            tracing::warn!(endpoint = %self.endpoint, %reason, "stream lost, falling back to polling");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "stream unavailable, falling back to polling");
                }
            }

            if !self.transition(ConnectionState::DegradedPolling) {
                return;
            }
            match self.poll_until_stream().await {
                Some(session) => attempt = Ok(session),
                None => return,
            }
        }
    }

    /// Records and reports a state change. Returns false once cancelled.
    fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == Some(next) {
            return self.delivery.is_open();
        }
        if let Some(previous) = self.state {
            tracing::info!(endpoint = %self.endpoint, from = previous.label(), to = next.label(), "transport transition");
        }
        self.state = Some(next);
        self.delivery.update(ConnectionUpdate::State(next))
    }

    fn deliver(&mut self, event: FleetEvent) -> bool {
        if matches!(event, FleetEvent::Robots(_)) {
            self.robots_delivered = true;
        }
        self.delivery.event(event)
    }

    /// Starts a stream connect that owns its captures, so it can stay in
    /// flight across poll iterations.
    fn stream_request(&self) -> Pending<Box<dyn StreamSession>> {
        let (ctx, connector, endpoint) = (self.ctx.clone(), self.connector.clone(), self.endpoint.clone());
        let limit = self.config.request_timeout();
        Box::pin(async move {
            tracing::debug!(url = %endpoint.stream_url, "opening stream");
            bounded(ctx.as_ref(), limit, connector.connect(&endpoint)).await
        })
    }

    fn zones_request(&self) -> Pending<String> {
        let (ctx, poller, endpoint) = (self.ctx.clone(), self.poller.clone(), self.endpoint.clone());
        let limit = self.config.request_timeout();
        Box::pin(async move { bounded(ctx.as_ref(), limit, poller.fetch_zones(&endpoint)).await })
    }

    async fn open_stream(&self) -> Result<Box<dyn StreamSession>, EnvError> {
        self.stream_request().await
    }

    /// Fetches the zone list. A failure is logged and tolerated.
    async fn refresh_zones(&mut self) -> bool {
        let body = self.zones_request().await;
        self.apply_zones(body)
    }

    fn apply_zones(&mut self, body: Result<String, EnvError>) -> bool {
        match body.map(|text| wire::parse_zones_body(&text)) {
            Ok(Ok(batch)) => self.deliver(FleetEvent::Zones(batch)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "zone list unreadable");
                self.delivery.is_open()
            }
            Err(e) => {
                tracing::warn!(error = %e, "zone fetch failed");
                self.delivery.is_open()
            }
        }
    }

    async fn pump(&mut self, session: &mut dyn StreamSession) -> StreamEnd {
        loop {
            let frame = match session.recv().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return StreamEnd::Fault(e.to_string()),
                None => return StreamEnd::Fault("closed by peer".to_string()),
            };

            let events = match wire::parse_stream_frame(&frame) {
                Ok(events) => events,
                Err(e) => return StreamEnd::Fault(e.to_string()),
            };
            if events.is_empty() {
                tracing::debug!("heartbeat frame");
            }
            for event in events {
                if !self.deliver(event) {
                    return StreamEnd::Cancelled;
                }
            }
        }
    }

    /// Pulls once.
    async fn poll_once(&mut self) -> bool {
        let limit = self.config.request_timeout();
        let result = bounded(self.ctx.as_ref(), limit, self.poller.fetch_status(&self.endpoint))
            .await
            .and_then(|text| wire::parse_status_body(&text).map_err(|e| EnvError::protocol(e.to_string())));

        match result {
            Ok(batch) => {
                tracing::debug!(records = batch.records.len(), "poll snapshot");
                self.deliver(FleetEvent::Robots(batch))
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "poll failed");
                if !self.robots_delivered && !self.initial_failure_reported {
                    self.initial_failure_reported = true;
                    return self
                        .delivery
                        .update(ConnectionUpdate::InitialLoadFailed(e.to_string()));
                }
                self.delivery.is_open()
            }
        }
    }

    /// Polls on the configured cadence, re-fetching zones and retrying the
    /// stream on their own cadences. Zone fetches and stream retries stay in
    /// flight alongside the polls, so a hanging request never delays a pull.
    /// Returns the session once a retry succeeds, or `None` when cancelled.
    async fn poll_until_stream(&mut self) -> Option<Box<dyn StreamSession>> {
        let poll_every = self.config.poll_interval();
        let zones_every = self.config.zone_refresh_interval();
        let retry_every = self.config.stream_retry_interval();

        let start = self.ctx.now();
        let mut next_poll = start;
        let mut next_zones = start + zones_every;
        let mut next_retry = retry_every.map(|every| start + every);
        let mut zones_in_flight: Option<Pending<String>> = None;
        let mut retry_in_flight: Option<Pending<Box<dyn StreamSession>>> = None;

        loop {
            if self.ctx.now() >= next_poll {
                if !self.poll_once().await {
                    return None;
                }
                next_poll += poll_every;
                let now = self.ctx.now();
                if next_poll <= now {
                    // Slow pull: skip the missed slots rather than firing back to back
                    next_poll = now + poll_every;
                }
            }

            let now = self.ctx.now();
            if zones_in_flight.is_none() && now >= next_zones {
                zones_in_flight = Some(self.zones_request());
            }
            if retry_in_flight.is_none() && next_retry.is_some_and(|at| now >= at) {
                retry_in_flight = Some(self.stream_request());
            }

            if !self.delivery.is_open() {
                return None;
            }

            let zones_due = zones_in_flight.is_none().then_some(next_zones);
            let retry_due = if retry_in_flight.is_none() { next_retry } else { None };
            let wake = [Some(next_poll), zones_due, retry_due]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(next_poll);
            let idle = wake.saturating_sub(now);

            let woke = tokio::select! {
                biased;
                session = in_flight(&mut retry_in_flight) => Wake::Stream(session),
                body = in_flight(&mut zones_in_flight) => Wake::Zones(body),
                _ = self.ctx.sleep(idle) => Wake::Deadline,
            };

            match woke {
                Wake::Deadline => {}
                Wake::Zones(body) => {
                    zones_in_flight = None;
                    next_zones = self.ctx.now() + zones_every;
                    if !self.apply_zones(body) {
                        return None;
                    }
                }
                Wake::Stream(Ok(session)) => {
                    tracing::info!(endpoint = %self.endpoint, "stream restored");
                    return Some(session);
                }
                Wake::Stream(Err(e)) => {
                    retry_in_flight = None;
                    tracing::debug!(error = %e, "stream retry failed");
                    next_retry = retry_every.map(|every| self.ctx.now() + every);
                }
            }
        }
    }
}

/// A request that owns its captures.
type Pending<T> = Pin<Box<dyn Future<Output = Result<T, EnvError>> + Send>>;

/// What ended one wait of the polling loop.
enum Wake {
    Deadline,
    Zones(Result<String, EnvError>),
    Stream(Result<Box<dyn StreamSession>, EnvError>),
}

/// Bounds a request by `limit` on the context clock.
async fn bounded<C, T, F>(ctx: &C, limit: Duration, request: F) -> Result<T, EnvError>
where
    C: FleetContext,
    F: Future<Output = Result<T, EnvError>>,
{
    tokio::select! {
        result = request => result,
        _ = ctx.sleep(limit) => Err(EnvError::timeout(limit)),
    }
}

/// Resolves the request in the slot; never resolves for an empty slot.
async fn in_flight<T>(slot: &mut Option<Pending<T>>) -> Result<T, EnvError> {
    match slot.as_mut() {
        Some(request) => request.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::wire::BatchKind;
    use async_trait::async_trait;
    use fleetview_env::TokioContext;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// One scripted connect outcome.
    pub enum Script {
        Refuse,
        /// Never resolve
        Hang,
        /// Deliver frames, then either stay open or close
        Frames { frames: Vec<String>, then_close: bool },
    }

    #[derive(Default)]
    pub struct FakeConnector {
        pub scripts: Mutex<VecDeque<Script>>,
        pub attempts: AtomicUsize,
    }

    impl FakeConnector {
        pub fn scripted(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                attempts: AtomicUsize::new(0),
            })
        }
    }

    struct FakeSession {
        frames: VecDeque<String>,
        then_close: bool,
    }

    #[async_trait]
    impl StreamSession for FakeSession {
        async fn recv(&mut self) -> Option<Result<String, EnvError>> {
            if let Some(frame) = self.frames.pop_front() {
                return Some(Ok(frame));
            }
            if self.then_close {
                return None;
            }
            std::future::pending::<()>().await;
            None
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl StreamConnector for FakeConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn StreamSession>, EnvError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Refuse);
            match script {
                Script::Refuse => Err(EnvError::connect("refused")),
                Script::Hang => std::future::pending().await,
                Script::Frames { frames, then_close } => Ok(Box::new(FakeSession {
                    frames: frames.into(),
                    then_close,
                })),
            }
        }
    }

    pub struct FakePoller {
        pub status_body: Mutex<Result<String, EnvError>>,
        pub polls: AtomicUsize,
        pub zone_fetches: AtomicUsize,
        pub latency: Duration,
        pub poll_starts: Mutex<Vec<tokio::time::Instant>>,
    }

    impl FakePoller {
        fn with(status_body: Result<String, EnvError>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                status_body: Mutex::new(status_body),
                polls: AtomicUsize::new(0),
                zone_fetches: AtomicUsize::new(0),
                latency,
                poll_starts: Mutex::new(Vec::new()),
            })
        }

        pub fn serving(body: &str) -> Arc<Self> {
            Self::with(Ok(body.to_string()), Duration::ZERO)
        }

        pub fn serving_slowly(body: &str, latency: Duration) -> Arc<Self> {
            Self::with(Ok(body.to_string()), latency)
        }

        pub fn failing() -> Arc<Self> {
            Self::with(Err(EnvError::HttpStatus(503)), Duration::ZERO)
        }

        /// Milliseconds from the first poll to each poll.
        pub fn poll_offsets_ms(&self) -> Vec<u128> {
            let starts = self.poll_starts.lock().unwrap();
            let Some(first) = starts.first().copied() else {
                return Vec::new();
            };
            starts.iter().map(|at| at.duration_since(first).as_millis()).collect()
        }
    }

    #[async_trait]
    impl StatusPoller for FakePoller {
        async fn fetch_status(&self, _endpoint: &Endpoint) -> Result<String, EnvError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.poll_starts.lock().unwrap().push(tokio::time::Instant::now());
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.status_body.lock().unwrap().clone()
        }

        async fn fetch_zones(&self, _endpoint: &Endpoint) -> Result<String, EnvError> {
            self.zone_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(r#"[{"id": "z1", "name": "Dock", "type": "charging", "floor_id": "F1"}]"#.to_string())
        }
    }

    #[derive(Default)]
    pub struct Recorder {
        pub events: Mutex<Vec<FleetEvent>>,
        pub updates: Mutex<Vec<ConnectionUpdate>>,
    }

    impl Recorder {
        fn robot_batches(&self) -> Vec<BatchKind> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    FleetEvent::Robots(batch) => Some(batch.kind),
                    FleetEvent::Zones(_) => None,
                })
                .collect()
        }

        fn states(&self) -> Vec<ConnectionState> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter_map(|u| match u {
                    ConnectionUpdate::State(s) => Some(*s),
                    ConnectionUpdate::InitialLoadFailed(_) => None,
                })
                .collect()
        }
    }

    const SNAPSHOT: &str = r#"{"robots": [{"id": "r1", "status": "idle", "position": {"x": 1, "y": 2}}]}"#;
    const STATUS: &str = r#"{"r1": {"status": "idle", "position": {"x": 1, "y": 2}}}"#;

    fn start(
        connector: Arc<FakeConnector>,
        poller: Arc<FakePoller>,
    ) -> (TransportHandle, Arc<Recorder>) {
        let manager = TransportManager::new(
            TokioContext::shared(),
            connector,
            poller,
            TransportConfig::default(),
        );
        let recorder = Arc::new(Recorder::default());
        let (events, updates) = (recorder.clone(), recorder.clone());
        let handle = manager.connect(
            Endpoint::from_base("http://fleet.test").unwrap(),
            move |event| events.events.lock().unwrap().push(event),
            move |update| updates.updates.lock().unwrap().push(update),
        );
        (handle, recorder)
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_goes_live_and_forwards_snapshots() {
        let connector = FakeConnector::scripted(vec![Script::Frames {
            frames: vec![SNAPSHOT.to_string(), r#"{"type": "ping"}"#.to_string()],
            then_close: false,
        }]);
        let poller = FakePoller::serving(STATUS);
        let (handle, recorder) = start(connector, poller.clone());
        settle(10).await;

        assert_eq!(recorder.states(), vec![ConnectionState::Connecting, ConnectionState::Live]);
        assert_eq!(recorder.robot_batches(), vec![BatchKind::StreamSnapshot]);
        assert_eq!(poller.zone_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(poller.polls.load(Ordering::SeqCst), 0);

        handle.disconnect();
        assert_eq!(recorder.states().last(), Some(&ConnectionState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_stream_polls_immediately_then_on_interval() {
        let connector = FakeConnector::scripted(vec![]);
        let poller = FakePoller::serving(STATUS);
        let (_handle, recorder) = start(connector, poller.clone());

        settle(10).await;
        assert_eq!(
            recorder.states(),
            vec![ConnectionState::Connecting, ConnectionState::DegradedPolling]
        );
        assert_eq!(poller.polls.load(Ordering::SeqCst), 1);

        settle(4_100).await;
        assert_eq!(poller.polls.load(Ordering::SeqCst), 3);
        assert!(recorder.robot_batches().iter().all(|k| *k == BatchKind::PollSnapshot));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stream_degrades_then_recovers_on_retry() {
        let connector = FakeConnector::scripted(vec![
            Script::Frames {
                frames: vec![SNAPSHOT.to_string()],
                then_close: true,
            },
            Script::Frames {
                frames: vec![SNAPSHOT.to_string()],
                then_close: false,
            },
        ]);
        let poller = FakePoller::serving(STATUS);
        let (_handle, recorder) = start(connector.clone(), poller.clone());

        settle(10).await;
        assert_eq!(
            recorder.states(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Live,
                ConnectionState::DegradedPolling
            ]
        );

        settle(10_500).await;
        assert_eq!(recorder.states().last(), Some(&ConnectionState::Live));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        // Polling stops once the stream is back
        let polls = poller.polls.load(Ordering::SeqCst);
        assert_eq!(polls, 6);
        settle(20_000).await;
        assert_eq!(poller.polls.load(Ordering::SeqCst), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_frame_degrades() {
        let connector = FakeConnector::scripted(vec![Script::Frames {
            frames: vec!["{not json".to_string()],
            then_close: false,
        }]);
        let (_handle, recorder) = start(connector, FakePoller::serving(STATUS));
        settle(10).await;
        assert_eq!(recorder.states().last(), Some(&ConnectionState::DegradedPolling));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_failure_reported_once() {
        let connector = FakeConnector::scripted(vec![]);
        let (_handle, recorder) = start(connector, FakePoller::failing());
        settle(6_100).await;

        let failures = recorder
            .updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| matches!(u, ConnectionUpdate::InitialLoadFailed(_)))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(recorder.states().last(), Some(&ConnectionState::DegradedPolling));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_callbacks_after_disconnect() {
        let connector = FakeConnector::scripted(vec![]);
        let poller = FakePoller::serving_slowly(STATUS, Duration::from_millis(500));
        let (handle, recorder) = start(connector, poller.clone());

        // First poll is in flight
        settle(100).await;
        assert_eq!(poller.polls.load(Ordering::SeqCst), 1);
        drop(handle);

        let events_at_close = recorder.events.lock().unwrap().len();
        let updates_at_close = recorder.updates.lock().unwrap().len();
        settle(10_000).await;

        assert_eq!(recorder.events.lock().unwrap().len(), events_at_close);
        assert_eq!(recorder.updates.lock().unwrap().len(), updates_at_close);
        assert_eq!(recorder.states().last(), Some(&ConnectionState::Closed));
        assert!(recorder.robot_batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_stream_retry_does_not_delay_polls() {
        // First connect refused, the 10s retry never answers
        let connector = FakeConnector::scripted(vec![Script::Refuse, Script::Hang]);
        let poller = FakePoller::serving(STATUS);
        let (_handle, recorder) = start(connector.clone(), poller.clone());

        settle(20_500).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(
            poller.poll_offsets_ms(),
            vec![0, 2_000, 4_000, 6_000, 8_000, 10_000, 12_000, 14_000, 16_000, 18_000, 20_000]
        );
        assert_eq!(recorder.states().last(), Some(&ConnectionState::DegradedPolling));

        // The timed out retry is rescheduled on its own cadence
        settle(5_000).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_does_not_fire_back_to_back() {
        let connector = FakeConnector::scripted(vec![]);
        let poller = FakePoller::serving_slowly(STATUS, Duration::from_millis(3_000));
        let (_handle, _recorder) = start(connector, poller.clone());

        settle(11_000).await;
        // Each pull overruns the interval; the next one waits a full interval
        assert_eq!(poller.poll_offsets_ms(), vec![0, 5_000, 10_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_disconnect_its_own_handle() {
        let connector = FakeConnector::scripted(vec![Script::Frames {
            frames: vec![SNAPSHOT.to_string()],
            then_close: false,
        }]);
        let manager = TransportManager::new(
            TokioContext::shared(),
            connector,
            FakePoller::serving(STATUS),
            TransportConfig::default(),
        );
        let recorder = Arc::new(Recorder::default());
        let slot: Arc<Mutex<Option<TransportHandle>>> = Arc::new(Mutex::new(None));

        let (events, updates, own) = (recorder.clone(), recorder.clone(), slot.clone());
        let handle = manager.connect(
            Endpoint::from_base("http://fleet.test").unwrap(),
            move |event| events.events.lock().unwrap().push(event),
            move |update| {
                let live = update == ConnectionUpdate::State(ConnectionState::Live);
                updates.updates.lock().unwrap().push(update);
                if live {
                    if let Some(handle) = own.lock().unwrap().as_ref() {
                        handle.disconnect();
                    }
                }
            },
        );
        *slot.lock().unwrap() = Some(handle);

        settle(10_000).await;
        assert_eq!(
            recorder.states(),
            vec![ConnectionState::Connecting, ConnectionState::Live, ConnectionState::Closed]
        );
        // The zone list arrived while connecting; the snapshot never did
        assert!(recorder.robot_batches().is_empty());
    }
}
