//! Scenario runner - drives a real `VisualizationController` against the
//! simulated backend on a paused tokio clock.

use crate::backend::{SimBackend, SimBackendController};
use crate::oracle::FleetOracle;
use crate::scenarios::ScenarioId;

use fleetview_core::{
    ConfigError, ConnectionState, ControllerError, ControllerPhase, FleetViewConfig, FloorId,
    MalformedEntity, RobotId, Scene, VisualizationController,
};
use fleetview_env::{Endpoint, EnvError, TokioContext};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Setup failures that prevent a scenario from running at all.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Frames rendered
    pub total_frames: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Robots in the canonical map at the end
    pub final_robot_count: usize,

    /// Every failed assertion, joined
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub stream_connects: u64,
    pub stream_frames: u64,
    pub polls: u64,
    pub zone_fetches: u64,
    /// Records rejected by the reconciler
    pub skipped_records: u64,
    pub live_frames: u64,
    pub degraded_frames: u64,
    /// Transitions into degraded polling
    pub degradations: u64,
    /// Largest gap between consecutive polls (ms)
    pub max_poll_gap_ms: Option<u64>,
    /// Largest rendered-vs-true distance seen at the end of the run
    pub final_render_error: f64,
}

/// Runs fleet view scenarios.
pub struct ScenarioRunner {
    seed: u64,
    max_duration_secs: f64,
    config: FleetViewConfig,
}

impl ScenarioRunner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_duration_secs: 10.0,
            config: FleetViewConfig::default(),
        }
    }

    /// Sets the run length. Scenarios that need longer extend it.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_config(mut self, config: FleetViewConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let duration = Duration::from_secs_f64(self.max_duration_secs.max(scenario.min_duration_secs()));

        let outcome = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .map_err(SimError::from)
            .and_then(|runtime| runtime.block_on(self.run_scenario(scenario, duration)));

        match outcome {
            Ok(run) => {
                let passed = run.failures.is_empty();
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed,
                    total_frames: run.frames,
                    final_time_secs: run.elapsed.as_secs_f64(),
                    final_robot_count: run.final_robot_count,
                    failure_reason: (!passed).then(|| run.failures.join("; ")),
                    metrics: run.metrics,
                }
            }
            Err(e) => ScenarioResult {
                scenario,
                seed: self.seed,
                passed: false,
                total_frames: 0,
                final_time_secs: 0.0,
                final_robot_count: 0,
                failure_reason: Some(format!("setup failed: {}", e)),
                metrics: ScenarioMetrics::default(),
            },
        }
    }

    async fn run_scenario(&self, scenario: ScenarioId, duration: Duration) -> Result<ScenarioRun, SimError> {
        match scenario {
            ScenarioId::SteadyStream => self.run_steady_stream(duration).await,
            ScenarioId::StreamDrop => self.run_stream_drop(duration).await,
            ScenarioId::PollingOnly => self.run_polling_only(duration).await,
            ScenarioId::MalformedRecord => self.run_malformed_record(duration).await,
            ScenarioId::UnmountInFlight => self.run_unmount_in_flight(duration).await,
            ScenarioId::InitialLoadFailure => self.run_initial_load_failure(duration).await,
            ScenarioId::FloorFilter => self.run_floor_filter(duration).await,
        }
    }

    fn harness(&self, robots: usize, floors: usize) -> Result<Harness, SimError> {
        Harness::new(self.seed, robots, floors, self.config.clone())
    }

    /// FV-001: rendered poses follow ground truth over a healthy stream.
    async fn run_steady_stream(&self, duration: Duration) -> Result<ScenarioRun, SimError> {
        let mut h = self.harness(8, 1)?;
        h.mount()?;

        let mut not_live = 0u64;
        h.run_until(duration, |scene, _, t| {
            if t > Duration::from_millis(500) && (scene.connection != ConnectionState::Live || scene.phase != ControllerPhase::Ready) {
                not_live += 1;
            }
        })
        .await;

        let truth = h.oracle().active_robots().count();
        let run = h.finish();
        let mut checks = Checks::default();
        checks.require(not_live == 0, || format!("{} frames were not live and ready", not_live));
        checks.require(run.final_robot_count == truth, || {
            format!("{} robots rendered, {} exist", run.final_robot_count, truth)
        });
        checks.require(run.metrics.polls == 0, || format!("{} polls while streaming", run.metrics.polls));
        checks.require(run.metrics.final_render_error < 1.0, || {
            format!("render error {:.3}m exceeds 1.0m", run.metrics.final_render_error)
        });
        Ok(run.with_failures(checks))
    }

    /// FV-002: stream closes mid-session; polling bridges without gaps until
    /// a retry succeeds.
    async fn run_stream_drop(&self, duration: Duration) -> Result<ScenarioRun, SimError> {
        let mut h = self.harness(8, 1)?;
        let poll_interval = self.config.transport.poll_interval();
        let retry = self.config.transport.stream_retry_interval().unwrap_or(Duration::from_secs(10));
        h.mount()?;

        h.run_until(Duration::from_secs(3), |_, _, _| {}).await;
        info!("  Dropping stream at t=3s");
        h.backend.set_stream_refused(true);
        h.backend.drop_streams();

        let mut degraded_at = None;
        let mut restored_at = None;
        h.run_until(Duration::from_secs(8), |scene, _, t| {
            if degraded_at.is_none() && scene.connection == ConnectionState::DegradedPolling {
                degraded_at = Some(t);
            }
        })
        .await;

        info!("  Backend accepts streams again at t=8s");
        h.backend.set_stream_refused(false);
        h.run_until(duration, |scene, _, t| {
            if restored_at.is_none() && scene.connection == ConnectionState::Live {
                restored_at = Some(t);
            }
        })
        .await;

        let polls_after_restore = h.backend.polls();
        h.run_until(duration + Duration::from_secs(5), |_, _, _| {}).await;
        let polls_at_end = h.backend.polls();
        let robots = h.oracle().active_robots().count();

        let run = h.finish();
        let mut checks = Checks::default();
        match degraded_at {
            Some(t) => checks.require(t <= Duration::from_secs(3) + retry, || {
                format!("degraded only at {:?}", t)
            }),
            None => checks.fail("never degraded after stream drop".to_string()),
        }
        checks.require(restored_at.is_some(), || "stream never restored".to_string());
        if let Some(gap) = run.metrics.max_poll_gap_ms {
            let limit = poll_interval.as_millis() as u64 + 50;
            checks.require(gap <= limit, || format!("poll gap {}ms exceeds {}ms", gap, limit));
        } else {
            checks.fail("fewer than two polls while degraded".to_string());
        }
        checks.require(polls_after_restore == polls_at_end, || {
            format!("{} polls after stream restored", polls_at_end - polls_after_restore)
        });
        checks.require(run.final_robot_count == robots, || {
            format!("{} robots after failover, {} exist", run.final_robot_count, robots)
        });
        Ok(run.with_failures(checks))
    }

    /// FV-003: no stream at all; polling keeps the fleet current and the
    /// stream is retried on its interval.
    async fn run_polling_only(&self, duration: Duration) -> Result<ScenarioRun, SimError> {
        let mut h = self.harness(6, 1)?;
        h.backend.set_stream_refused(true);
        h.mount()?;

        let mut wrong_state = 0u64;
        let mut not_ready = 0u64;
        h.run_until(duration, |scene, _, t| {
            if t > Duration::from_millis(100) {
                if scene.connection != ConnectionState::DegradedPolling {
                    wrong_state += 1;
                }
                if scene.phase != ControllerPhase::Ready {
                    not_ready += 1;
                }
            }
        })
        .await;

        let robots = h.oracle().active_robots().count();
        let expected_polls = (duration.as_secs_f64() / self.config.transport.poll_interval().as_secs_f64()) as u64;
        let run = h.finish();
        let mut checks = Checks::default();
        checks.require(wrong_state == 0, || format!("{} frames not in degraded polling", wrong_state));
        checks.require(not_ready == 0, || format!("{} frames not ready", not_ready));
        checks.require(run.metrics.stream_connects >= 2, || "stream was never retried".to_string());
        checks.require(run.metrics.polls >= expected_polls, || {
            format!("{} polls, expected at least {}", run.metrics.polls, expected_polls)
        });
        checks.require(run.final_robot_count == robots, || {
            format!("{} robots tracked, {} exist", run.final_robot_count, robots)
        });
        Ok(run.with_failures(checks))
    }

    /// FV-004: one robot of five turns malformed; the others keep updating
    /// and nobody is removed.
    async fn run_malformed_record(&self, duration: Duration) -> Result<ScenarioRun, SimError> {
        let mut h = self.harness(5, 1)?;
        h.mount()?;
        let broken = RobotId::from("AMR-003");

        h.run_until(Duration::from_secs(2), |_, _, _| {}).await;
        h.oracle().set_malformed(broken.as_str(), true);
        // Let snapshots generated before the switch drain
        h.run_until(Duration::from_millis(2_200), |_, _, _| {}).await;
        let frozen = h.canonical_positions();
        let skipped_before = h.controller.reconciler().skipped_total();

        h.run_until(duration, |_, _, _| {}).await;
        let after = h.canonical_positions();
        let skipped = h.controller.reconciler().skipped_total() - skipped_before;
        let null_reported = h
            .controller
            .diagnostics()
            .any(|d| d.id.as_deref() == Some(broken.as_str()) && d.error == MalformedEntity::NullPosition);

        let moved = after
            .iter()
            .filter(|(id, pos)| **id != broken && frozen.get(*id).map_or(false, |before| *before != **pos))
            .count();

        let run = h.finish();
        let mut checks = Checks::default();
        checks.require(run.final_robot_count == 5, || {
            format!("{} robots remain, expected all 5", run.final_robot_count)
        });
        checks.require(frozen.get(&broken) == after.get(&broken), || {
            "malformed robot position changed".to_string()
        });
        checks.require(moved == 4, || format!("{} healthy robots updated, expected 4", moved));
        checks.require(skipped > 0, || "no record was skipped".to_string());
        checks.require(null_reported, || "null position was not diagnosed".to_string());
        Ok(run.with_failures(checks))
    }

    /// FV-005: unmount while a slow poll is in flight.
    async fn run_unmount_in_flight(&self, duration: Duration) -> Result<ScenarioRun, SimError> {
        let mut h = self.harness(4, 1)?;
        h.backend.set_stream_refused(true);
        h.backend.set_poll_latency(Duration::from_millis(500));
        h.mount()?;

        // Polls start at t=0 and t=2s; the second is still running at 2.2s
        h.run_until(Duration::from_millis(2_200), |_, _, _| {}).await;
        let polls_at_unmount = h.backend.polls();
        let positions = h.canonical_positions();
        let frames_at_unmount = h.controller.frames();
        h.controller.unmount();
        debug!("  unmounted with {} polls started", polls_at_unmount);

        h.run_until(duration, |_, _, _| {}).await;

        let run = h.finish_without_scene();
        let mut checks = Checks::default();
        checks.require(h.controller.phase() == &ControllerPhase::Disposed, || "not disposed".to_string());
        checks.require(h.controller.frames() == frames_at_unmount, || {
            format!("{} frames after unmount", h.controller.frames() - frames_at_unmount)
        });
        checks.require(h.disposed_ticks > 0, || "no ticks attempted after unmount".to_string());
        checks.require(h.canonical_positions() == positions, || "state mutated after unmount".to_string());
        checks.require(h.backend.polls() == polls_at_unmount, || {
            format!("{} polls started after unmount", h.backend.polls() - polls_at_unmount)
        });
        Ok(run.with_failures(checks))
    }

    /// FV-006: nothing answers at first; the error is shown, then the view
    /// recovers once polls succeed.
    async fn run_initial_load_failure(&self, duration: Duration) -> Result<ScenarioRun, SimError> {
        let mut h = self.harness(4, 1)?;
        h.backend.set_stream_refused(true);
        h.backend.set_polls_failing(true);
        h.mount()?;

        let mut error_frames = 0u64;
        let mut status_shown = true;
        h.run_until(Duration::from_secs(3), |scene, _, t| {
            if t > Duration::from_millis(100) {
                if matches!(scene.phase, ControllerPhase::Error(_)) {
                    error_frames += 1;
                    status_shown &= scene.status_text.starts_with("Fleet data unavailable");
                }
            }
        })
        .await;

        info!("  Polls recover at t=3s");
        h.backend.set_polls_failing(false);
        let mut ready_at = None;
        h.run_until(duration, |scene, _, t| {
            if ready_at.is_none() && scene.phase == ControllerPhase::Ready {
                ready_at = Some(t);
            }
        })
        .await;

        let run = h.finish();
        let mut checks = Checks::default();
        checks.require(error_frames > 0, || "error phase never shown".to_string());
        checks.require(status_shown, || "error status text missing".to_string());
        checks.require(ready_at.is_some(), || "never recovered to ready".to_string());
        checks.require(run.final_robot_count == 4, || {
            format!("{} robots after recovery, expected 4", run.final_robot_count)
        });
        Ok(run.with_failures(checks))
    }

    /// FV-007: the floor filter hides other floors and resets heat.
    async fn run_floor_filter(&self, duration: Duration) -> Result<ScenarioRun, SimError> {
        let mut h = self.harness(6, 2)?;
        h.mount()?;
        h.controller.toggle_heatmap();

        let mut all_floors = 0usize;
        h.run_until(Duration::from_secs(2), |scene, _, _| all_floors = scene.robots.len()).await;
        let heat_before = h.controller.heatmap().snapshot().len();

        h.controller.set_floor(Some(FloorId::from("F1")));
        let heat_cleared = h.controller.heatmap().snapshot().is_empty();

        let mut off_floor = 0u64;
        let mut on_floor = 0usize;
        let mut zones_on_floor = 0usize;
        h.run_until(Duration::from_secs(4), |scene, oracle, _| {
            off_floor += off_floor_sprites("F1", scene, oracle);
            on_floor = scene.robots.len();
            zones_on_floor = scene.zones.len();
        })
        .await;

        h.controller.cycle_floor();
        let mut second_floor = 0usize;
        h.run_until(duration.max(Duration::from_secs(5)), |scene, oracle, _| {
            off_floor += off_floor_sprites("F2", scene, oracle);
            second_floor = scene.robots.len();
        })
        .await;

        h.controller.cycle_floor();
        let back_to_all = h.controller.view().active_floor_id.is_none();

        let run = h.finish();
        let mut checks = Checks::default();
        checks.require(all_floors == 6, || format!("{} robots on all floors, expected 6", all_floors));
        checks.require(heat_before > 0, || "heatmap never accumulated".to_string());
        checks.require(heat_cleared, || "heatmap not cleared on floor change".to_string());
        checks.require(off_floor == 0, || format!("{} off-floor robots rendered", off_floor));
        checks.require(on_floor == 3 && second_floor == 3, || {
            format!("{} robots on F1 and {} on F2, expected 3 each", on_floor, second_floor)
        });
        checks.require(zones_on_floor == 2, || format!("{} zones on F1, expected 2", zones_on_floor));
        checks.require(back_to_all, || "floor cycle did not return to all floors".to_string());
        Ok(run.with_failures(checks))
    }
}

/// Rendered robots whose true floor differs from `floor`.
fn off_floor_sprites(floor: &str, scene: &Scene, oracle: &FleetOracle) -> u64 {
    scene
        .robots
        .iter()
        .filter(|sprite| oracle.robot(sprite.robot_id.as_str()).map(|r| r.floor_id.as_str()) != Some(floor))
        .count() as u64
}

/// What a scenario observed.
struct ScenarioRun {
    frames: u64,
    elapsed: Duration,
    final_robot_count: usize,
    metrics: ScenarioMetrics,
    failures: Vec<String>,
}

impl ScenarioRun {
    fn with_failures(mut self, checks: Checks) -> Self {
        self.failures = checks.failures;
        self
    }
}

/// Failed assertions, in order.
#[derive(Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn require(&mut self, ok: bool, message: impl FnOnce() -> String) {
        if !ok {
            self.fail(message());
        }
    }

    fn fail(&mut self, message: String) {
        warn!("  assertion failed: {}", message);
        self.failures.push(message);
    }
}

/// One controller wired to one simulated fleet.
struct Harness {
    oracle: Arc<Mutex<FleetOracle>>,
    backend: Arc<SimBackendController>,
    controller: VisualizationController<TokioContext>,
    frame: Duration,
    elapsed: Duration,
    last_scene: Option<Scene>,
    last_connection: Option<ConnectionState>,
    disposed_ticks: u64,
    metrics: ScenarioMetrics,
}

impl Harness {
    fn new(seed: u64, robots: usize, floors: usize, config: FleetViewConfig) -> Result<Self, SimError> {
        // Physics seed derived separately so fleet layout is independent of the engine
        let physics_seed = seed.wrapping_mul(0x9e3779b97f4a7c15);
        let oracle = Arc::new(Mutex::new(FleetOracle::with_fleet(physics_seed, robots, floors)));
        let backend_controller = Arc::new(SimBackendController::new());
        let backend = Arc::new(SimBackend::new(oracle.clone(), backend_controller.clone()));
        let frame = config.interpolation.frame_interval();

        let controller = VisualizationController::new(TokioContext::shared(), backend.clone(), backend, config)?;

        Ok(Self {
            oracle,
            backend: backend_controller,
            controller,
            frame,
            elapsed: Duration::ZERO,
            last_scene: None,
            last_connection: None,
            disposed_ticks: 0,
            metrics: ScenarioMetrics::default(),
        })
    }

    fn mount(&mut self) -> Result<(), SimError> {
        self.controller.mount(Endpoint::from_base("http://sim.fleet.local")?)?;
        Ok(())
    }

    fn oracle(&self) -> MutexGuard<'_, FleetOracle> {
        self.oracle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn canonical_positions(&self) -> HashMap<RobotId, (f64, f64)> {
        self.controller
            .reconciler()
            .robots()
            .iter()
            .map(|(id, r)| (id.clone(), (r.position.x, r.position.y)))
            .collect()
    }

    /// Renders frames until `until`, stepping the oracle in lockstep.
    async fn run_until<F>(&mut self, until: Duration, mut inspect: F)
    where
        F: FnMut(&Scene, &FleetOracle, Duration),
    {
        while self.elapsed < until {
            tokio::time::sleep(self.frame).await;
            self.elapsed += self.frame;

            let mut oracle = self.oracle.lock().unwrap_or_else(|e| e.into_inner());
            oracle.step(self.frame.as_secs_f64());

            let Some(scene) = self.controller.tick() else {
                self.disposed_ticks += 1;
                continue;
            };

            match scene.connection {
                ConnectionState::Live => self.metrics.live_frames += 1,
                ConnectionState::DegradedPolling => {
                    self.metrics.degraded_frames += 1;
                    if self.last_connection != Some(ConnectionState::DegradedPolling) {
                        self.metrics.degradations += 1;
                    }
                }
                _ => {}
            }
            self.last_connection = Some(scene.connection);

            inspect(&scene, &oracle, self.elapsed);
            if scene.frame % 60 == 0 {
                debug!(
                    "  t={:.1}s | robots={} | {}",
                    self.elapsed.as_secs_f64(),
                    scene.robots.len(),
                    scene.connection.label()
                );
            }
            self.last_scene = Some(scene);
        }
    }

    fn render_error(&self) -> f64 {
        let Some(scene) = &self.last_scene else {
            return 0.0;
        };
        let oracle = self.oracle();
        scene
            .robots
            .iter()
            .filter_map(|sprite| {
                let truth = oracle.robot(sprite.robot_id.as_str())?;
                Some((sprite.world.coords - truth.position).norm())
            })
            .fold(0.0, f64::max)
    }

    fn collect_metrics(&mut self) {
        self.metrics.stream_connects = self.backend.connects();
        self.metrics.stream_frames = self.backend.frames_sent();
        self.metrics.polls = self.backend.polls();
        self.metrics.zone_fetches = self.backend.zone_fetches();
        self.metrics.skipped_records = self.controller.reconciler().skipped_total();
        self.metrics.max_poll_gap_ms = self
            .backend
            .max_poll_gap(Duration::ZERO)
            .map(|gap| gap.as_millis() as u64);
        self.metrics.final_render_error = self.render_error();
    }

    /// Summarizes the run and unmounts.
    fn finish(mut self) -> ScenarioRun {
        let run = self.finish_without_scene();
        self.controller.unmount();
        run
    }

    /// Summarizes the run, leaving the controller as it is.
    fn finish_without_scene(&mut self) -> ScenarioRun {
        self.collect_metrics();
        ScenarioRun {
            frames: self.controller.frames(),
            elapsed: self.elapsed,
            final_robot_count: self.controller.reconciler().robots().len(),
            metrics: self.metrics.clone(),
            failures: Vec::new(),
        }
    }
}
