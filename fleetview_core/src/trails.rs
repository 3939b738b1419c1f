//! Bounded per-robot path trails.

use crate::config::TrailConfig;
use crate::model::RobotId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One recorded point of a trail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathTrailPoint {
    pub x: f64,
    pub y: f64,
    /// Controller clock time at recording
    pub timestamp: Duration,
}

/// Ring buffer of recent positions for every robot.
pub struct PathTrailTracker {
    config: TrailConfig,
    trails: HashMap<RobotId, VecDeque<PathTrailPoint>>,
}

impl PathTrailTracker {
    pub fn new(config: TrailConfig) -> Self {
        Self {
            config,
            trails: HashMap::new(),
        }
    }

    /// Appends a point unless the robot moved less than `min_distance`
    /// since its last recorded point. Returns whether a point was added.
    pub fn record(&mut self, robot_id: &RobotId, x: f64, y: f64, timestamp: Duration) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }

        let capacity = self.config.capacity;
        let trail = self
            .trails
            .entry(robot_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if let Some(last) = trail.back() {
            let moved = ((x - last.x).powi(2) + (y - last.y).powi(2)).sqrt();
            if moved < self.config.min_distance {
                return false;
            }
        }

        if trail.len() == capacity {
            trail.pop_front();
        }
        trail.push_back(PathTrailPoint { x, y, timestamp });
        true
    }

    /// Points oldest-first; empty for unknown robots.
    pub fn get_trail(&self, robot_id: &RobotId) -> Vec<PathTrailPoint> {
        self.trails
            .get(robot_id)
            .map(|trail| trail.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn trail(&self, robot_id: &RobotId) -> Option<&VecDeque<PathTrailPoint>> {
        self.trails.get(robot_id)
    }

    pub fn clear(&mut self, robot_id: &RobotId) {
        self.trails.remove(robot_id);
    }

    pub fn len(&self) -> usize {
        self.trails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trails.is_empty()
    }
}
