//! View state and the world ↔ screen projection.
//!
//! ```text
//! screen = origin + pan + world · (zoom_percent / 100 · pixels_per_unit)
//! ```
//!
//! Zoom is an integer percentage moved in whole steps, so any sequence of
//! zoom in/out lands exactly on a step value.

use crate::config::ViewConfig;
use crate::interpolation::InterpolatedRobotView;
use crate::model::{EntityRef, FloorId, RobotId};
use nalgebra::{Point2, Vector2};

/// User-controlled view parameters. Independent of transport cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub zoom_percent: u32,
    /// `None` shows every floor
    pub active_floor_id: Option<FloorId>,
    pub show_heatmap: bool,
    pub show_paths: bool,
    pub selected_entity: Option<EntityRef>,
    /// Screen-space offset added after scaling
    pub pan: Vector2<f64>,
}

impl ViewState {
    pub fn from_config(config: &ViewConfig) -> Self {
        Self {
            zoom_percent: config.initial_zoom_percent,
            active_floor_id: config.initial_floor_id.clone(),
            show_heatmap: config.show_heatmap,
            show_paths: config.show_paths,
            selected_entity: None,
            pan: Vector2::zeros(),
        }
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::from_config(&ViewConfig::default())
    }
}

/// Projection and zoom policy derived from `ViewConfig`.
#[derive(Debug, Clone)]
pub struct ViewTransform {
    config: ViewConfig,
}

impl ViewTransform {
    pub fn new(config: ViewConfig) -> Self {
        Self { config }
    }

    /// Screen units per world unit at the current zoom.
    pub fn scale(&self, view: &ViewState) -> f64 {
        view.zoom_percent as f64 / 100.0 * self.config.pixels_per_unit
    }

    fn offset(&self, view: &ViewState) -> Vector2<f64> {
        Vector2::new(self.config.origin[0], self.config.origin[1]) + view.pan
    }

    pub fn world_to_screen(&self, world: Point2<f64>, view: &ViewState) -> Point2<f64> {
        Point2::from(world.coords * self.scale(view) + self.offset(view))
    }

    pub fn screen_to_world(&self, screen: Point2<f64>, view: &ViewState) -> Point2<f64> {
        Point2::from((screen.coords - self.offset(view)) / self.scale(view))
    }

    /// One step in, clamped. Returns whether the zoom changed.
    pub fn zoom_in(&self, view: &mut ViewState) -> bool {
        let next = view
            .zoom_percent
            .saturating_add(self.config.zoom_step_percent)
            .min(self.config.max_zoom_percent);
        let changed = next != view.zoom_percent;
        view.zoom_percent = next;
        changed
    }

    /// One step out, clamped. Returns whether the zoom changed.
    pub fn zoom_out(&self, view: &mut ViewState) -> bool {
        let next = view
            .zoom_percent
            .saturating_sub(self.config.zoom_step_percent)
            .max(self.config.min_zoom_percent);
        let changed = next != view.zoom_percent;
        view.zoom_percent = next;
        changed
    }

    pub fn pan_by(&self, view: &mut ViewState, dx: f64, dy: f64) {
        if dx.is_finite() && dy.is_finite() {
            view.pan += Vector2::new(dx, dy);
        }
    }

    /// Restores zoom and pan; floor filter, toggles and selection are kept.
    pub fn reset(&self, view: &mut ViewState) {
        view.zoom_percent = self.config.initial_zoom_percent;
        view.pan = Vector2::zeros();
    }

    /// Floor filter: with an active floor, only entities on exactly that
    /// floor are renderable (floorless entities included).
    pub fn is_visible(&self, floor_id: Option<&FloorId>, view: &ViewState) -> bool {
        match &view.active_floor_id {
            None => true,
            Some(active) => floor_id == Some(active),
        }
    }

    /// Steps the floor filter through `floors`, then back to "all".
    pub fn cycle_floor(&self, view: &mut ViewState, floors: &[FloorId]) {
        view.active_floor_id = match &view.active_floor_id {
            None => floors.first().cloned(),
            Some(current) => floors
                .iter()
                .position(|f| f == current)
                .and_then(|i| floors.get(i + 1))
                .cloned(),
        };
    }

    /// Nearest robot within the pick radius of a screen point.
    pub fn hit_test<'a>(
        &self,
        screen: Point2<f64>,
        robots: &[InterpolatedRobotView<'a>],
        view: &ViewState,
    ) -> Option<&'a RobotId> {
        let radius = self.config.pick_radius_px;
        robots
            .iter()
            .map(|robot| {
                let at = self.world_to_screen(Point2::new(robot.x, robot.y), view);
                (robot.robot_id, (at - screen).norm())
            })
            .filter(|(_, distance)| *distance <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Position, RobotState, RobotStatus};
    use approx::assert_relative_eq;

    fn transform() -> ViewTransform {
        ViewTransform::new(ViewConfig::default())
    }

    #[test]
    fn test_zoom_round_trip_is_exact() {
        let t = transform();
        let mut view = ViewState::default();
        assert_eq!(view.zoom_percent, 100);
        assert!(t.zoom_in(&mut view));
        assert_eq!(view.zoom_percent, 125);
        assert!(t.zoom_out(&mut view));
        assert_eq!(view.zoom_percent, 100);

        for _ in 0..50 {
            t.zoom_in(&mut view);
            t.zoom_out(&mut view);
        }
        assert_eq!(view.zoom_percent, 100);
    }

    #[test]
    fn test_zoom_is_clamped() {
        let t = transform();
        let mut view = ViewState::default();
        for _ in 0..100 {
            t.zoom_in(&mut view);
        }
        assert_eq!(view.zoom_percent, 400);
        assert!(!t.zoom_in(&mut view));
        for _ in 0..100 {
            t.zoom_out(&mut view);
        }
        assert_eq!(view.zoom_percent, 25);
        assert!(!t.zoom_out(&mut view));
    }

    #[test]
    fn test_projection_inverts() {
        let t = transform();
        let mut view = ViewState::default();
        t.zoom_in(&mut view);
        t.pan_by(&mut view, 30.0, -12.5);

        let world = Point2::new(3.25, -7.5);
        let screen = t.world_to_screen(world, &view);
        assert_relative_eq!(screen.x, 3.25 * 25.0 + 30.0);
        let back = t.screen_to_world(screen, &view);
        assert_relative_eq!(back.x, world.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, world.y, epsilon = 1e-12);

        t.reset(&mut view);
        assert_eq!(view.zoom_percent, 100);
        assert_eq!(view.pan, Vector2::zeros());
    }

    #[test]
    fn test_floor_filter() {
        let t = transform();
        let mut view = ViewState::default();
        let f1 = FloorId::from("F1");
        assert!(t.is_visible(None, &view));
        view.active_floor_id = Some(f1.clone());
        assert!(t.is_visible(Some(&f1), &view));
        assert!(!t.is_visible(Some(&FloorId::from("F2")), &view));
        assert!(!t.is_visible(None, &view));
    }

    #[test]
    fn test_cycle_floor_wraps_to_all() {
        let t = transform();
        let mut view = ViewState::default();
        let floors = vec![FloorId::from("F1"), FloorId::from("F2")];
        t.cycle_floor(&mut view, &floors);
        assert_eq!(view.active_floor_id, Some(FloorId::from("F1")));
        t.cycle_floor(&mut view, &floors);
        assert_eq!(view.active_floor_id, Some(FloorId::from("F2")));
        t.cycle_floor(&mut view, &floors);
        assert_eq!(view.active_floor_id, None);
    }

    #[test]
    fn test_hit_test_picks_nearest_in_radius() {
        let t = transform();
        let view = ViewState::default();
        let robots: Vec<RobotState> = [("a", 0.0), ("b", 1.0)]
            .iter()
            .map(|(id, x)| RobotState {
                robot_id: RobotId::from(*id),
                name: id.to_string(),
                status: RobotStatus::Idle,
                position: Position::new(*x, 0.0, 0.0),
                battery_level: 100.0,
                current_task_id: None,
                speed: 0.0,
            })
            .collect();
        let views: Vec<InterpolatedRobotView> = robots
            .iter()
            .map(|r| InterpolatedRobotView {
                robot_id: &r.robot_id,
                x: r.position.x,
                y: r.position.y,
                orientation: 0.0,
                source: r,
            })
            .collect();

        // b sits at screen x = 20
        assert_eq!(t.hit_test(Point2::new(17.0, 2.0), &views, &view).map(|id| id.as_str()), Some("b"));
        assert_eq!(t.hit_test(Point2::new(4.0, 0.0), &views, &view).map(|id| id.as_str()), Some("a"));
        assert!(t.hit_test(Point2::new(200.0, 200.0), &views, &view).is_none());
    }
}
