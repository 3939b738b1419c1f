//! Visualization controller - owns every subsystem and drives the frame loop.
//!
//! Transport callbacks only enqueue; the queue is drained at the start of
//! each tick, so reconciliation of an update always happens before the
//! interpolation step of the same frame.
//!
//! ```text
//! Loading ──first robot data──▶ Ready
//!    │                            ▲
//!    └─initial load failed─▶ Error┘ (later robot data)
//! any ──unmount──▶ Disposed
//! ```

use crate::config::{ConfigError, FleetViewConfig};
use crate::heatmap::{HeatCell, HeatmapAccumulator};
use crate::interpolation::MotionInterpolator;
use crate::model::{
    ChangeSet, ConnectionState, EntityRef, FloorId, RobotId, RobotStatus, ZoneId,
};
use crate::reconciler::{Diagnostic, Reconciler};
use crate::trails::PathTrailTracker;
use crate::transport::{ConnectionUpdate, TransportHandle, TransportManager};
use crate::view::{ViewState, ViewTransform};
use crate::wire::FleetEvent;
use fleetview_env::{Endpoint, FleetContext, StatusPoller, StreamConnector};
use nalgebra::Point2;
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Lifecycle of a mounted view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ControllerPhase {
    Loading,
    Ready,
    /// Initial load failed; the message is shown, rendering continues
    Error(String),
    Disposed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Controller is already mounted")]
    AlreadyMounted,

    #[error("Controller has been disposed")]
    Disposed,
}

/// Transport output, queued for the next tick.
#[derive(Debug)]
enum Inbound {
    Event(FleetEvent),
    Connection(ConnectionUpdate),
}

/// A robot as drawn this frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotSprite {
    pub robot_id: RobotId,
    pub name: String,
    pub status: RobotStatus,
    /// Interpolated pose
    pub world: Point2<f64>,
    pub screen: Point2<f64>,
    pub orientation: f64,
    pub battery_level: f64,
    pub current_task_id: Option<String>,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSprite {
    pub zone_id: ZoneId,
    pub name: String,
    pub zone_type: String,
    pub selected: bool,
}

/// One heatmap cell in screen space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatTile {
    pub cell: HeatCell,
    /// Corner of the cell at its minimum world coordinates
    pub screen: Point2<f64>,
    pub size_px: f64,
    /// Density normalized to [0, 1]
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailLine {
    pub robot_id: RobotId,
    /// Oldest first, screen space
    pub points: Vec<Point2<f64>>,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    pub frame: u64,
    pub timestamp: Duration,
    pub phase: ControllerPhase,
    pub connection: ConnectionState,
    pub status_text: String,
    pub zoom_percent: u32,
    pub active_floor_id: Option<FloorId>,
    pub robots: Vec<RobotSprite>,
    pub zones: Vec<ZoneSprite>,
    pub heat_tiles: Vec<HeatTile>,
    pub trails: Vec<TrailLine>,
    pub selected: Option<EntityRef>,
}

type SelectCallback = Box<dyn FnMut(Option<&EntityRef>) + Send>;

/// Owns transport, reconciler, interpolator, heatmap, trails and view.
pub struct VisualizationController<C: FleetContext> {
    ctx: Arc<C>,
    config: FleetViewConfig,
    transport: TransportManager<C>,
    handle: Option<TransportHandle>,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,

    reconciler: Reconciler,
    interpolator: MotionInterpolator,
    heatmap: HeatmapAccumulator,
    trails: PathTrailTracker,
    transform: ViewTransform,
    view: ViewState,

    phase: ControllerPhase,
    connection: ConnectionState,
    on_select: Option<SelectCallback>,
    last_tick: Option<Duration>,
    frames: u64,
}

impl<C: FleetContext> VisualizationController<C> {
    /// Validates the configuration and builds every subsystem. Nothing
    /// connects until `mount`.
    pub fn new(
        ctx: Arc<C>,
        connector: Arc<dyn StreamConnector>,
        poller: Arc<dyn StatusPoller>,
        config: FleetViewConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            transport: TransportManager::new(ctx.clone(), connector, poller, config.transport.clone()),
            ctx,
            handle: None,
            inbound: None,
            reconciler: Reconciler::new(config.reconciler.clone()),
            interpolator: MotionInterpolator::new(config.interpolation.clone()),
            heatmap: HeatmapAccumulator::new(config.heatmap.clone()),
            trails: PathTrailTracker::new(config.trails.clone()),
            transform: ViewTransform::new(config.view.clone()),
            view: ViewState::from_config(&config.view),
            phase: ControllerPhase::Loading,
            connection: ConnectionState::Connecting,
            on_select: None,
            last_tick: None,
            frames: 0,
            config,
        })
    }

    /// Connects the transport. Updates are applied on subsequent ticks.
    pub fn mount(&mut self, endpoint: Endpoint) -> Result<(), ControllerError> {
        if self.phase == ControllerPhase::Disposed {
            return Err(ControllerError::Disposed);
        }
        if self.handle.is_some() {
            return Err(ControllerError::AlreadyMounted);
        }

        tracing::info!(%endpoint, "mounting fleet view");
        let (tx, rx) = mpsc::unbounded_channel();
        let events = tx.clone();
        let handle = self.transport.connect(
            endpoint,
            move |event| {
                let _ = events.send(Inbound::Event(event));
            },
            move |update| {
                let _ = tx.send(Inbound::Connection(update));
            },
        );
        self.handle = Some(handle);
        self.inbound = Some(rx);
        Ok(())
    }

    /// Advances one frame. Returns `None` once disposed.
    pub fn tick(&mut self) -> Option<Scene> {
        if self.phase == ControllerPhase::Disposed {
            return None;
        }

        let now = self.ctx.now();
        let dt = self.last_tick.map_or(Duration::ZERO, |last| now.saturating_sub(last));
        self.last_tick = Some(now);

        self.drain_inbound(now);

        let (transform, view) = (&self.transform, &self.view);
        self.interpolator
            .tick(self.reconciler.robots(), dt, |robot| transform.is_visible(robot.floor_id(), view));

        if self.heatmap.is_active(self.view.show_heatmap) {
            // Heat follows where robots are drawn; the interpolator holds only on-floor robots
            let positions: Vec<(f64, f64)> = self
                .interpolator
                .views(self.reconciler.robots())
                .iter()
                .map(|rendered| (rendered.x, rendered.y))
                .collect();
            self.heatmap.tick(positions);
        }

        self.frames += 1;
        tracing::trace!(frame = self.frames, dt_ms = dt.as_millis() as u64, "tick");
        Some(self.scene(now))
    }

    fn drain_inbound(&mut self, now: Duration) {
        let Some(inbound) = self.inbound.as_mut() else {
            return;
        };
        let mut pending = Vec::new();
        while let Ok(message) = inbound.try_recv() {
            pending.push(message);
        }

        for message in pending {
            match message {
                Inbound::Event(FleetEvent::Robots(batch)) => {
                    let changes = self.reconciler.apply_robot_update(batch);
                    self.apply_robot_changes(&changes, now);
                    if self.phase != ControllerPhase::Ready {
                        tracing::info!(robots = self.reconciler.robots().len(), "fleet view ready");
                        self.phase = ControllerPhase::Ready;
                    }
                }
                Inbound::Event(FleetEvent::Zones(batch)) => {
                    let changes = self.reconciler.apply_zone_update(batch);
                    let lost = matches!(
                        &self.view.selected_entity,
                        Some(EntityRef::Zone(selected)) if changes.removed.contains(selected)
                    );
                    if lost {
                        self.set_selection(None);
                    }
                }
                Inbound::Connection(ConnectionUpdate::State(state)) => {
                    self.connection = state;
                }
                Inbound::Connection(ConnectionUpdate::InitialLoadFailed(reason)) => {
                    if self.phase == ControllerPhase::Loading {
                        tracing::warn!(%reason, "initial fleet load failed");
                        self.phase = ControllerPhase::Error(reason);
                    }
                }
            }
        }
    }

    fn apply_robot_changes(&mut self, changes: &ChangeSet<RobotId>, now: Duration) {
        let robots = self.reconciler.robots();
        self.interpolator.observe(changes, robots);

        for id in changes.touched() {
            if let Some(robot) = robots.get(id) {
                self.trails.record(id, robot.position.x, robot.position.y, now);
            }
        }
        for id in &changes.removed {
            self.trails.clear(id);
        }

        let lost = matches!(
            &self.view.selected_entity,
            Some(EntityRef::Robot(selected)) if changes.removed.contains(selected)
        );
        if lost {
            self.set_selection(None);
        }
    }

    fn scene(&self, now: Duration) -> Scene {
        let view = &self.view;
        let transform = &self.transform;
        let robots = self.reconciler.robots();

        let robot_sprites: Vec<RobotSprite> = self
            .interpolator
            .views(robots)
            .into_iter()
            .map(|rendered| {
                let world = Point2::new(rendered.x, rendered.y);
                let robot = rendered.source;
                RobotSprite {
                    robot_id: robot.robot_id.clone(),
                    name: robot.name.clone(),
                    status: robot.status,
                    world,
                    screen: transform.world_to_screen(world, view),
                    orientation: rendered.orientation,
                    battery_level: robot.battery_level,
                    current_task_id: robot.current_task_id.clone(),
                    selected: view.selected_entity.as_ref() == Some(&EntityRef::Robot(robot.robot_id.clone())),
                }
            })
            .collect();

        let mut zones: Vec<ZoneSprite> = self
            .reconciler
            .zones()
            .values()
            .filter(|zone| transform.is_visible(zone.floor_id.as_ref(), view))
            .map(|zone| ZoneSprite {
                zone_id: zone.zone_id.clone(),
                name: zone.name.clone(),
                zone_type: zone.zone_type.clone(),
                selected: view.selected_entity.as_ref() == Some(&EntityRef::Zone(zone.zone_id.clone())),
            })
            .collect();
        zones.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));

        let heat_tiles = if view.show_heatmap {
            let size_px = self.heatmap.cell_size() * transform.scale(view);
            self.heatmap
                .visible_cells()
                .into_iter()
                .map(|(cell, intensity)| {
                    let (x, y) = self.heatmap.cell_origin(cell);
                    HeatTile {
                        cell,
                        screen: transform.world_to_screen(Point2::new(x, y), view),
                        size_px,
                        intensity,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        let trails = if view.show_paths {
            robot_sprites
                .iter()
                .filter_map(|sprite| {
                    let trail = self.trails.trail(&sprite.robot_id)?;
                    (trail.len() > 1).then(|| TrailLine {
                        robot_id: sprite.robot_id.clone(),
                        points: trail
                            .iter()
                            .map(|p| transform.world_to_screen(Point2::new(p.x, p.y), view))
                            .collect(),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        Scene {
            frame: self.frames,
            timestamp: now,
            phase: self.phase.clone(),
            connection: self.connection,
            status_text: self.status_text(),
            zoom_percent: view.zoom_percent,
            active_floor_id: view.active_floor_id.clone(),
            robots: robot_sprites,
            zones,
            heat_tiles,
            trails,
            selected: view.selected_entity.clone(),
        }
    }

    /// Human-readable status line for the current phase and transport.
    pub fn status_text(&self) -> String {
        match &self.phase {
            ControllerPhase::Loading => "Loading fleet data...".to_string(),
            ControllerPhase::Error(reason) => format!("Fleet data unavailable: {}", reason),
            ControllerPhase::Disposed => "Disposed".to_string(),
            ControllerPhase::Ready => {
                let skipped = self.reconciler.skipped_total();
                let mut text = format!(
                    "{} robots, {} zones | {}",
                    self.reconciler.robots().len(),
                    self.reconciler.zones().len(),
                    self.connection.label()
                );
                if skipped > 0 {
                    text.push_str(&format!(" | {} skipped", skipped));
                }
                text
            }
        }
    }

    // ---- controls ----

    pub fn zoom_in(&mut self) -> bool {
        self.transform.zoom_in(&mut self.view)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.transform.zoom_out(&mut self.view)
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.transform.pan_by(&mut self.view, dx, dy);
    }

    pub fn reset_view(&mut self) {
        self.transform.reset(&mut self.view);
    }

    /// Changes the floor filter. Heat is cleared since cells carry no floor.
    pub fn set_floor(&mut self, floor_id: Option<FloorId>) {
        if self.view.active_floor_id != floor_id {
            tracing::debug!(floor = ?floor_id, "floor filter changed");
            self.view.active_floor_id = floor_id;
            self.heatmap.clear();
        }
    }

    /// Steps through the known floors, then back to all floors.
    pub fn cycle_floor(&mut self) {
        let mut next = self.view.clone();
        self.transform.cycle_floor(&mut next, &self.reconciler.floors());
        self.set_floor(next.active_floor_id);
    }

    pub fn toggle_heatmap(&mut self) -> bool {
        self.view.show_heatmap = !self.view.show_heatmap;
        self.view.show_heatmap
    }

    pub fn toggle_paths(&mut self) -> bool {
        self.view.show_paths = !self.view.show_paths;
        self.view.show_paths
    }

    /// Selects a known robot. Unknown ids leave the selection untouched.
    pub fn select_robot(&mut self, robot_id: &RobotId) -> bool {
        if self.reconciler.robot(robot_id).is_none() {
            return false;
        }
        self.set_selection(Some(EntityRef::Robot(robot_id.clone())));
        true
    }

    pub fn select_zone(&mut self, zone_id: &ZoneId) -> bool {
        if self.reconciler.zone(zone_id).is_none() {
            return false;
        }
        self.set_selection(Some(EntityRef::Zone(zone_id.clone())));
        true
    }

    pub fn clear_selection(&mut self) {
        self.set_selection(None);
    }

    /// Selects the robot under a screen point, or clears the selection.
    pub fn click(&mut self, screen: Point2<f64>) -> Option<RobotId> {
        let hit = {
            let views = self.interpolator.views(self.reconciler.robots());
            self.transform.hit_test(screen, &views, &self.view).cloned()
        };
        self.set_selection(hit.clone().map(EntityRef::Robot));
        hit
    }

    /// Registers the selection callback, replacing any previous one.
    pub fn on_select<F>(&mut self, callback: F)
    where
        F: FnMut(Option<&EntityRef>) + Send + 'static,
    {
        self.on_select = Some(Box::new(callback));
    }

    fn set_selection(&mut self, selection: Option<EntityRef>) {
        if self.view.selected_entity == selection {
            return;
        }
        self.view.selected_entity = selection;
        if let Some(callback) = self.on_select.as_mut() {
            callback(self.view.selected_entity.as_ref());
        }
    }

    // ---- teardown ----

    /// Disconnects the transport and drops all pending updates. Terminal.
    pub fn unmount(&mut self) {
        if self.phase == ControllerPhase::Disposed {
            return;
        }
        if let Some(handle) = self.handle.take() {
            handle.disconnect();
        }
        self.inbound = None;
        self.on_select = None;
        self.phase = ControllerPhase::Disposed;
        tracing::info!(frames = self.frames, "fleet view unmounted");
    }

    /// Ticks on the configured frame cadence, handing each scene to `sink`,
    /// until the sink breaks or the controller is disposed. Unmounts on exit.
    pub async fn run<F>(&mut self, mut sink: F)
    where
        F: FnMut(&Scene) -> ControlFlow<()>,
    {
        let frame = self.config.interpolation.frame_interval();
        loop {
            self.ctx.sleep(frame).await;
            let Some(scene) = self.tick() else {
                break;
            };
            if sink(&scene).is_break() {
                break;
            }
        }
        self.unmount();
    }

    // ---- accessors ----

    pub fn phase(&self) -> &ControllerPhase {
        &self.phase
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn heatmap(&self) -> &HeatmapAccumulator {
        &self.heatmap
    }

    pub fn trails(&self) -> &PathTrailTracker {
        &self.trails
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.reconciler.diagnostics()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_mounted(&self) -> bool {
        self.handle.is_some()
    }
}

impl<C: FleetContext> Drop for VisualizationController<C> {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::{FakeConnector, FakePoller, Script};
    use fleetview_env::TokioContext;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    const TWO_FLOORS: &str = r#"{
        "r1": {"name": "Atlas", "status": "working", "battery_level": 80,
               "position": {"x": 1.0, "y": 1.0, "orientation": 0, "floor_id": "F1"}},
        "r2": {"name": "Boreas", "status": "idle", "battery_level": 55,
               "position": {"x": 3.0, "y": 4.0, "orientation": 90, "floor_id": "F2"}}
    }"#;

    fn controller(
        connector: Arc<FakeConnector>,
        poller: Arc<FakePoller>,
    ) -> VisualizationController<TokioContext> {
        VisualizationController::new(
            TokioContext::shared(),
            connector,
            poller,
            FleetViewConfig::default(),
        )
        .unwrap()
    }

    fn endpoint() -> Endpoint {
        Endpoint::from_base("http://fleet.test").unwrap()
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_robot_data_moves_to_ready() {
        let mut view = controller(FakeConnector::scripted(vec![]), FakePoller::serving(TWO_FLOORS));
        assert_eq!(view.phase(), &ControllerPhase::Loading);
        view.mount(endpoint()).unwrap();
        assert_eq!(view.mount(endpoint()), Err(ControllerError::AlreadyMounted));

        settle(10).await;
        let scene = view.tick().unwrap();
        assert_eq!(scene.phase, ControllerPhase::Ready);
        assert_eq!(scene.connection, ConnectionState::DegradedPolling);
        assert_eq!(scene.robots.len(), 2);
        assert_eq!(scene.zones.len(), 1);
        assert!(scene.status_text.contains("2 robots"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_snapshot_renders_live() {
        let connector = FakeConnector::scripted(vec![Script::Frames {
            frames: vec![r#"{"robots": [{"id": "r9", "status": "charging", "position": {"x": 2, "y": 2}}]}"#.to_string()],
            then_close: false,
        }]);
        let mut view = controller(connector, FakePoller::serving("{}"));
        view.mount(endpoint()).unwrap();
        settle(10).await;

        let scene = view.tick().unwrap();
        assert_eq!(scene.connection, ConnectionState::Live);
        assert_eq!(scene.robots[0].robot_id.as_str(), "r9");
        assert_eq!(scene.robots[0].status, RobotStatus::Charging);
        // Default battery for a robot that reports none
        assert_eq!(scene.robots[0].battery_level, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_failure_then_recovery() {
        let poller = FakePoller::failing();
        let mut view = controller(FakeConnector::scripted(vec![]), poller.clone());
        view.mount(endpoint()).unwrap();
        settle(10).await;

        let scene = view.tick().unwrap();
        assert!(matches!(scene.phase, ControllerPhase::Error(_)));
        assert!(scene.status_text.starts_with("Fleet data unavailable"));

        *poller.status_body.lock().unwrap() = Ok(TWO_FLOORS.to_string());
        settle(2_000).await;
        assert_eq!(view.tick().unwrap().phase, ControllerPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_with_poll_in_flight() {
        let poller = FakePoller::serving_slowly(TWO_FLOORS, Duration::from_millis(500));
        let mut view = controller(FakeConnector::scripted(vec![]), poller.clone());
        view.mount(endpoint()).unwrap();
        settle(100).await;
        assert_eq!(poller.polls.load(Ordering::SeqCst), 1);

        view.unmount();
        settle(5_000).await;

        assert!(view.tick().is_none());
        assert!(view.reconciler().robots().is_empty());
        assert_eq!(view.phase(), &ControllerPhase::Disposed);
        assert_eq!(
            view.mount(endpoint()),
            Err(ControllerError::Disposed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_filter_and_heat_reset() {
        let mut view = controller(FakeConnector::scripted(vec![]), FakePoller::serving(TWO_FLOORS));
        view.mount(endpoint()).unwrap();
        settle(10).await;
        view.tick();
        assert!(!view.heatmap().snapshot().is_empty());

        view.set_floor(Some(FloorId::from("F1")));
        assert!(view.heatmap().snapshot().is_empty());
        let scene = view.tick().unwrap();
        assert_eq!(scene.robots.len(), 1);
        assert_eq!(scene.robots[0].robot_id.as_str(), "r1");
        assert_eq!(scene.zones.len(), 1);

        view.cycle_floor();
        assert_eq!(view.view().active_floor_id, Some(FloorId::from("F2")));
        view.cycle_floor();
        assert_eq!(view.view().active_floor_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heat_lands_where_robot_is_drawn() {
        let at = |x: f64| {
            format!(
                r#"{{"r1": {{"status": "working", "position": {{"x": {}, "y": 0.5, "floor_id": "F1"}}}}}}"#,
                x
            )
        };
        let poller = FakePoller::serving(&at(0.5));
        let mut view = controller(FakeConnector::scripted(vec![]), poller.clone());
        view.mount(endpoint()).unwrap();
        settle(10).await;
        view.tick();

        *poller.status_body.lock().unwrap() = Ok(at(8.5));
        let mut drawn_x = 0.5;
        for _ in 0..200 {
            settle(16).await;
            drawn_x = view.tick().unwrap().robots[0].world.x;
            if drawn_x > 0.6 {
                break;
            }
        }

        // First frame after the jump: the sprite is still gliding
        assert!(drawn_x > 0.6 && drawn_x < 4.0, "drawn at {}", drawn_x);
        let heat = view.heatmap();
        assert!(heat.density(heat.cell_for(drawn_x, 0.5)) > 0.0);
        assert_eq!(heat.density(heat.cell_for(8.5, 0.5)), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_selects_and_notifies() {
        let mut view = controller(FakeConnector::scripted(vec![]), FakePoller::serving(TWO_FLOORS));
        let seen: Arc<Mutex<Vec<Option<EntityRef>>>> = Arc::default();
        let sink = seen.clone();
        view.on_select(move |entity| sink.lock().unwrap().push(entity.cloned()));
        view.mount(endpoint()).unwrap();
        settle(10).await;
        view.tick();

        // r1 at (1, 1) projects to (20, 20) at 100%
        let hit = view.click(Point2::new(22.0, 19.0));
        assert_eq!(hit, Some(RobotId::from("r1")));
        let scene = view.tick().unwrap();
        assert!(scene.robots.iter().any(|r| r.selected && r.robot_id.as_str() == "r1"));

        assert_eq!(view.click(Point2::new(500.0, 500.0)), None);
        assert!(view.select_zone(&ZoneId::from("z1")));
        assert!(!view.select_robot(&RobotId::from("ghost")));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Some(EntityRef::Robot(RobotId::from("r1"))),
                None,
                Some(EntityRef::Zone(ZoneId::from("z1"))),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggles_control_layers() {
        let mut view = controller(FakeConnector::scripted(vec![]), FakePoller::serving(TWO_FLOORS));
        view.mount(endpoint()).unwrap();
        settle(10).await;

        let scene = view.tick().unwrap();
        assert!(scene.heat_tiles.is_empty());
        assert!(view.toggle_heatmap());
        assert!(!view.tick().unwrap().heat_tiles.is_empty());
        assert!(!view.toggle_paths());
        assert!(view.tick().unwrap().trails.is_empty());

        assert!(view.zoom_in());
        assert!(view.zoom_out());
        assert_eq!(view.tick().unwrap().zoom_percent, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_sink_breaks() {
        let mut view = controller(FakeConnector::scripted(vec![]), FakePoller::serving(TWO_FLOORS));
        view.mount(endpoint()).unwrap();
        let mut frames = 0;
        view.run(|_scene| {
            frames += 1;
            if frames == 30 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await;
        assert_eq!(frames, 30);
        assert_eq!(view.phase(), &ControllerPhase::Disposed);
        assert!(!view.is_mounted());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = FleetViewConfig::default();
        config.interpolation.smoothing = 1.5;
        let result = VisualizationController::new(
            TokioContext::shared(),
            FakeConnector::scripted(vec![]),
            FakePoller::serving("{}"),
            config,
        );
        assert!(result.is_err());
    }
}
