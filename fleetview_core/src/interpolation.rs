//! Motion interpolation - smooth rendered poses from discrete snapshots.
//!
//! Canonical state moves in jumps (one per transport update); the rendered
//! pose chases it every frame with exponential smoothing:
//!
//! ```text
//! rendered += (target - rendered) * α_eff      α_eff = 1 - (1 - α)^(dt · fps)
//! ```
//!
//! `α_eff` stays in [0, 1] for any frame delta, so a pose never overshoots
//! its target. Heading follows the shortest arc across the ±180° seam.

use crate::config::InterpolationConfig;
use crate::model::{normalize_degrees, shortest_angle_delta, ChangeSet, RobotId, RobotMap, RobotState};
use nalgebra::Vector2;
use std::collections::HashMap;
use std::time::Duration;

/// The pose currently drawn for one robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedPose {
    pub x: f64,
    pub y: f64,
    pub orientation: f64,
}

impl RenderedPose {
    pub fn at_target(robot: &RobotState) -> Self {
        Self {
            x: robot.position.x,
            y: robot.position.y,
            orientation: robot.position.orientation,
        }
    }

    pub fn point(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// Planar distance to the robot's reconciled position.
    pub fn distance_to(&self, robot: &RobotState) -> f64 {
        (self.point() - Vector2::new(robot.position.x, robot.position.y)).norm()
    }
}

/// Per-frame view of a robot: interpolated pose plus its canonical record.
#[derive(Debug, Clone, Copy)]
pub struct InterpolatedRobotView<'a> {
    pub robot_id: &'a RobotId,
    pub x: f64,
    pub y: f64,
    pub orientation: f64,
    pub source: &'a RobotState,
}

/// Owns the rendered poses; reads canonical state, never writes it.
pub struct MotionInterpolator {
    config: InterpolationConfig,
    rendered: HashMap<RobotId, RenderedPose>,
}

impl MotionInterpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            rendered: HashMap::new(),
        }
    }

    /// Applies a reconciliation result.
    ///
    /// Newly added robots start exactly at their target. Removed robots stay
    /// until the next `tick`, which drops anything no longer canonical.
    pub fn observe(&mut self, changes: &ChangeSet<RobotId>, robots: &RobotMap) {
        for id in &changes.added {
            if let Some(robot) = robots.get(id) {
                self.rendered.insert(id.clone(), RenderedPose::at_target(robot));
            }
        }
    }

    /// Smoothing factor for a frame of length `dt`.
    pub fn alpha_for(&self, dt: Duration) -> f64 {
        let frames = dt.as_secs_f64() * self.config.frame_rate_hz;
        let alpha = 1.0 - (1.0 - self.config.smoothing).powf(frames);
        alpha.clamp(0.0, 1.0)
    }

    /// Advances every included robot toward its reconciled target.
    ///
    /// Robots rejected by `include` (e.g. off-floor) are dropped from the
    /// set and re-enter at their target when included again.
    pub fn tick<F>(&mut self, robots: &RobotMap, dt: Duration, include: F)
    where
        F: Fn(&RobotState) -> bool,
    {
        self.rendered
            .retain(|id, _| robots.get(id).map_or(false, |robot| include(robot)));

        let alpha = self.alpha_for(dt);
        let epsilon = self.config.snap_epsilon;

        for robot in robots.values().filter(|robot| include(robot)) {
            match self.rendered.get_mut(&robot.robot_id) {
                Some(pose) => step(pose, robot, alpha, epsilon),
                None => {
                    self.rendered
                        .insert(robot.robot_id.clone(), RenderedPose::at_target(robot));
                }
            }
        }
    }

    pub fn pose(&self, id: &RobotId) -> Option<&RenderedPose> {
        self.rendered.get(id)
    }

    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }

    /// Interpolated views joined with canonical state, ordered by robot id.
    pub fn views<'a>(&'a self, robots: &'a RobotMap) -> Vec<InterpolatedRobotView<'a>> {
        let mut views: Vec<InterpolatedRobotView<'a>> = self
            .rendered
            .iter()
            .filter_map(|(id, pose)| {
                robots.get(id).map(|source| InterpolatedRobotView {
                    robot_id: &source.robot_id,
                    x: pose.x,
                    y: pose.y,
                    orientation: pose.orientation,
                    source,
                })
            })
            .collect();
        views.sort_by(|a, b| a.robot_id.cmp(b.robot_id));
        views
    }
}

fn step(pose: &mut RenderedPose, target: &RobotState, alpha: f64, epsilon: f64) {
    let current = pose.point();
    let goal = Vector2::new(target.position.x, target.position.y);
    let turn = shortest_angle_delta(pose.orientation, target.position.orientation);

    let next = current.lerp(&goal, alpha);
    let next_turn = turn * (1.0 - alpha);

    if (goal - next).norm() <= epsilon && next_turn.abs() <= epsilon {
        *pose = RenderedPose::at_target(target);
        return;
    }

    pose.x = next.x;
    pose.y = next.y;
    pose.orientation = normalize_degrees(target.position.orientation - next_turn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Position, RobotStatus};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    const FRAME: Duration = Duration::from_micros(16_667);

    fn robot(id: &str, x: f64, y: f64, heading: f64) -> RobotState {
        RobotState {
            robot_id: RobotId::from(id),
            name: id.to_string(),
            status: RobotStatus::Working,
            position: Position::new(x, y, heading),
            battery_level: 50.0,
            current_task_id: None,
            speed: 1.0,
        }
    }

    fn map(robots: Vec<RobotState>) -> RobotMap {
        robots.into_iter().map(|r| (r.robot_id.clone(), r)).collect()
    }

    fn all(_: &RobotState) -> bool {
        true
    }

    #[test]
    fn test_new_robot_starts_at_target() {
        let mut interpolator = MotionInterpolator::new(InterpolationConfig::default());
        let robots = map(vec![robot("a", 5.0, -3.0, 45.0)]);
        interpolator.observe(
            &ChangeSet {
                added: vec![RobotId::from("a")],
                ..Default::default()
            },
            &robots,
        );
        let pose = interpolator.pose(&RobotId::from("a")).unwrap();
        assert_eq!((pose.x, pose.y, pose.orientation), (5.0, -3.0, 45.0));
    }

    #[test]
    fn test_moves_part_way_without_overshoot() {
        let mut interpolator = MotionInterpolator::new(InterpolationConfig::default());
        let mut robots = map(vec![robot("a", 0.0, 0.0, 0.0)]);
        interpolator.tick(&robots, FRAME, all);

        robots.insert(RobotId::from("a"), robot("a", 10.0, 0.0, 0.0));
        interpolator.tick(&robots, FRAME, all);

        let pose = interpolator.pose(&RobotId::from("a")).unwrap();
        assert!(pose.x > 0.0 && pose.x < 10.0);
        assert_relative_eq!(pose.x, 10.0 * interpolator.alpha_for(FRAME), epsilon = 1e-9);
    }

    #[test]
    fn test_alpha_is_frame_rate_independent() {
        let interpolator = MotionInterpolator::new(InterpolationConfig::default());
        assert_relative_eq!(interpolator.alpha_for(FRAME), 0.2, epsilon = 1e-3);
        assert_eq!(interpolator.alpha_for(Duration::ZERO), 0.0);
        assert!(interpolator.alpha_for(Duration::from_secs(60)) <= 1.0);
        // Two half frames cover the same ground as one full frame
        let half = 1.0 - interpolator.alpha_for(FRAME / 2);
        assert_relative_eq!(1.0 - half * half, interpolator.alpha_for(FRAME), epsilon = 1e-3);
    }

    #[test]
    fn test_heading_wraps_through_zero() {
        let mut interpolator = MotionInterpolator::new(InterpolationConfig::default());
        let mut robots = map(vec![robot("a", 0.0, 0.0, 359.0)]);
        interpolator.tick(&robots, FRAME, all);
        robots.insert(RobotId::from("a"), robot("a", 0.0, 0.0, 1.0));

        for _ in 0..200 {
            interpolator.tick(&robots, FRAME, all);
            let heading = interpolator.pose(&RobotId::from("a")).unwrap().orientation;
            // Never swings the long way through 180
            assert!((-1.0..=1.0).contains(&heading), "heading {}", heading);
        }
        assert_relative_eq!(interpolator.pose(&RobotId::from("a")).unwrap().orientation, 1.0);
    }

    #[test]
    fn test_removed_and_filtered_robots_are_dropped() {
        let mut interpolator = MotionInterpolator::new(InterpolationConfig::default());
        let mut robots = map(vec![robot("a", 0.0, 0.0, 0.0), robot("b", 1.0, 1.0, 0.0)]);
        interpolator.tick(&robots, FRAME, all);
        assert_eq!(interpolator.len(), 2);

        robots.remove(&RobotId::from("b"));
        interpolator.tick(&robots, FRAME, all);
        assert_eq!(interpolator.len(), 1);

        interpolator.tick(&robots, FRAME, |r| r.robot_id.as_str() != "a");
        assert!(interpolator.is_empty());
    }

    #[test]
    fn test_views_join_canonical_state() {
        let mut interpolator = MotionInterpolator::new(InterpolationConfig::default());
        let robots = map(vec![robot("b", 1.0, 1.0, 0.0), robot("a", 0.0, 0.0, 0.0)]);
        interpolator.tick(&robots, FRAME, all);
        let views = interpolator.views(&robots);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].robot_id.as_str(), "a");
        assert_eq!(views[1].source.position.x, 1.0);
    }

    proptest! {
        #[test]
        fn prop_converges_monotonically(
            sx in -500.0f64..500.0, sy in -500.0f64..500.0, sh in -720.0f64..720.0,
            tx in -500.0f64..500.0, ty in -500.0f64..500.0, th in -720.0f64..720.0,
        ) {
            let mut interpolator = MotionInterpolator::new(InterpolationConfig::default());
            let mut robots = map(vec![robot("a", sx, sy, sh)]);
            interpolator.tick(&robots, FRAME, all);
            robots.insert(RobotId::from("a"), robot("a", tx, ty, th));
            let target = robots[&RobotId::from("a")].clone();

            let mut last_distance = f64::INFINITY;
            let mut last_turn = f64::INFINITY;
            for _ in 0..400 {
                interpolator.tick(&robots, FRAME, all);
                let pose = *interpolator.pose(&RobotId::from("a")).unwrap();
                let distance = pose.distance_to(&target);
                let turn = shortest_angle_delta(pose.orientation, target.position.orientation).abs();
                prop_assert!(distance <= last_distance + 1e-9);
                prop_assert!(turn <= last_turn + 1e-9);
                last_distance = distance;
                last_turn = turn;
            }
            prop_assert!(last_distance < 1e-3);
            prop_assert!(last_turn < 1e-3);
        }
    }
}
