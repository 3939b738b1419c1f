//! Ground truth fleet for simulation.
//!
//! The oracle owns the "real" fleet the simulated backend reports on:
//! - True positions of all robots (waypoint patrols on named floors)
//! - Status and battery evolution
//! - Wire payloads in the backend's snake_case convention, with noise
//!   and optional malformed records

use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// A robot as it really is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimRobot {
    pub id: String,
    pub name: String,
    pub floor_id: String,
    pub position: Vector2<f64>,
    /// Degrees, direction of travel
    pub heading: f64,
    /// m/s while working
    pub cruise_speed: f64,
    pub status: String,
    pub battery: f64,
    pub task_id: Option<String>,
    waypoints: Vec<Vector2<f64>>,
    next_waypoint: usize,
    pub active: bool,
}

impl SimRobot {
    pub fn speed(&self) -> f64 {
        if self.status == "working" {
            self.cruise_speed
        } else {
            0.0
        }
    }
}

/// A static zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimZone {
    pub id: String,
    pub name: String,
    pub zone_type: String,
    pub floor_id: String,
}

/// The Oracle - maintains ground truth and generates backend payloads.
pub struct FleetOracle {
    /// RNG for motion noise and status events
    rng: ChaCha8Rng,
    robots: BTreeMap<String, SimRobot>,
    zones: Vec<SimZone>,
    next_id: u64,
    /// Current simulation time (seconds)
    current_time: f64,
    /// Reported position noise standard deviation (meters)
    position_noise_std: f64,
    /// Robots whose records are emitted with `position: null`
    malformed: BTreeSet<String>,
}

impl FleetOracle {
    pub fn new(physics_seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(physics_seed),
            robots: BTreeMap::new(),
            zones: Vec::new(),
            next_id: 1,
            current_time: 0.0,
            position_noise_std: 0.02,
            malformed: BTreeSet::new(),
        }
    }

    /// A fleet of `robots` patrolling rectangles spread over `floors` floors,
    /// with one charging zone and one storage zone per floor.
    pub fn with_fleet(physics_seed: u64, robots: usize, floors: usize) -> Self {
        let mut oracle = Self::new(physics_seed);
        let floors = floors.max(1);

        for f in 0..floors {
            let floor = floor_name(f);
            oracle.add_zone(&format!("Z-{}-CHG", floor), "Charging Bay", "charging", &floor);
            oracle.add_zone(&format!("Z-{}-STO", floor), "Storage", "storage", &floor);
        }

        for i in 0..robots {
            let floor = floor_name(i % floors);
            let origin = Vector2::new((i / floors) as f64 * 6.0, (i % 3) as f64 * 4.0);
            let width = oracle.rng.gen_range(3.0..8.0);
            let height = oracle.rng.gen_range(2.0..5.0);
            let waypoints = vec![
                origin,
                origin + Vector2::new(width, 0.0),
                origin + Vector2::new(width, height),
                origin + Vector2::new(0.0, height),
            ];
            let speed = oracle.rng.gen_range(0.6..1.6);
            oracle.spawn_robot(&floor, waypoints, speed);
        }
        oracle
    }

    pub fn set_position_noise(&mut self, std_dev: f64) {
        self.position_noise_std = std_dev.max(0.0);
    }

    pub fn add_zone(&mut self, id: &str, name: &str, zone_type: &str, floor_id: &str) {
        self.zones.push(SimZone {
            id: id.to_string(),
            name: name.to_string(),
            zone_type: zone_type.to_string(),
            floor_id: floor_id.to_string(),
        });
    }

    /// Spawns a working robot at its first waypoint and returns its id.
    pub fn spawn_robot(&mut self, floor_id: &str, waypoints: Vec<Vector2<f64>>, cruise_speed: f64) -> String {
        let id = format!("AMR-{:03}", self.next_id);
        let battery = self.rng.gen_range(40.0..100.0);
        let robot = SimRobot {
            id: id.clone(),
            name: format!("Robot {}", self.next_id),
            floor_id: floor_id.to_string(),
            position: waypoints.first().copied().unwrap_or_else(Vector2::zeros),
            heading: 0.0,
            cruise_speed,
            status: "working".to_string(),
            battery,
            task_id: Some(format!("T-{}", 100 + self.next_id)),
            waypoints,
            next_waypoint: 1,
            active: true,
        };
        self.next_id += 1;
        self.robots.insert(id.clone(), robot);
        id
    }

    pub fn remove_robot(&mut self, id: &str) {
        if let Some(robot) = self.robots.get_mut(id) {
            robot.active = false;
        }
    }

    /// Emits `position: null` for this robot until cleared.
    pub fn set_malformed(&mut self, id: &str, malformed: bool) {
        if malformed {
            self.malformed.insert(id.to_string());
        } else {
            self.malformed.remove(id);
        }
    }

    /// Advances the fleet by dt seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;

        for robot in self.robots.values_mut().filter(|r| r.active) {
            match robot.status.as_str() {
                "working" => {
                    advance_along_route(robot, dt);
                    robot.battery = (robot.battery - 0.15 * dt).max(0.0);
                    if robot.battery < 20.0 {
                        robot.status = "charging".to_string();
                        robot.task_id = None;
                    }
                }
                "charging" => {
                    robot.battery = (robot.battery + 2.0 * dt).min(100.0);
                    if robot.battery >= 95.0 {
                        robot.status = "working".to_string();
                        robot.task_id = Some(format!("T-{}", (self.current_time * 10.0) as u64));
                    }
                }
                _ => {}
            }
        }
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn active_robots(&self) -> impl Iterator<Item = &SimRobot> {
        self.robots.values().filter(|r| r.active)
    }

    pub fn robot(&self, id: &str) -> Option<&SimRobot> {
        self.robots.get(id).filter(|r| r.active)
    }

    pub fn zones(&self) -> &[SimZone] {
        &self.zones
    }

    pub fn floors(&self) -> Vec<String> {
        let floors: BTreeSet<String> = self.zones.iter().map(|z| z.floor_id.clone()).collect();
        floors.into_iter().collect()
    }

    fn robot_record(&mut self, id: &str) -> Option<Value> {
        let noise = Normal::new(0.0, self.position_noise_std).ok();
        let (dx, dy) = match noise {
            Some(normal) if self.position_noise_std > 0.0 => {
                (normal.sample(&mut self.rng), normal.sample(&mut self.rng))
            }
            _ => (0.0, 0.0),
        };

        let robot = self.robots.get(id).filter(|r| r.active)?;
        let position = if self.malformed.contains(id) {
            Value::Null
        } else {
            json!({
                "x": robot.position.x + dx,
                "y": robot.position.y + dy,
                "orientation": robot.heading,
                "floor_id": robot.floor_id,
            })
        };

        Some(json!({
            "robot_id": robot.id,
            "name": robot.name,
            "status": robot.status,
            "battery_level": (robot.battery * 10.0).round() / 10.0,
            "current_task_id": robot.task_id,
            "speed": robot.speed(),
            "position": position,
        }))
    }

    fn records(&mut self) -> Vec<Value> {
        let ids: Vec<String> = self.active_robots().map(|r| r.id.clone()).collect();
        ids.iter().filter_map(|id| self.robot_record(id)).collect()
    }

    fn zone_records(&self) -> Vec<Value> {
        self.zones
            .iter()
            .map(|z| {
                json!({
                    "zone_id": z.id,
                    "name": z.name,
                    "zone_type": z.zone_type,
                    "floor_id": z.floor_id,
                })
            })
            .collect()
    }

    /// Body of `GET /api/simulation/status`: a map keyed by robot id.
    pub fn status_body(&mut self) -> String {
        let map: serde_json::Map<String, Value> = self
            .records()
            .into_iter()
            .filter_map(|record| {
                let id = record.get("robot_id")?.as_str()?.to_string();
                Some((id, record))
            })
            .collect();
        Value::Object(map).to_string()
    }

    /// A full streaming snapshot including zones.
    pub fn stream_snapshot(&mut self) -> String {
        json!({
            "type": "fleet_snapshot",
            "data": {
                "robots": self.records(),
                "zones": self.zone_records(),
            }
        })
        .to_string()
    }

    /// Body of `GET /api/zones`.
    pub fn zones_body(&self) -> String {
        Value::Array(self.zone_records()).to_string()
    }
}

fn floor_name(index: usize) -> String {
    format!("F{}", index + 1)
}

fn advance_along_route(robot: &mut SimRobot, dt: f64) {
    if robot.waypoints.len() < 2 {
        return;
    }
    let mut budget = robot.cruise_speed * dt;
    while budget > 0.0 {
        let target = robot.waypoints[robot.next_waypoint];
        let to_target = target - robot.position;
        let distance = to_target.norm();
        if distance <= budget {
            robot.position = target;
            budget -= distance;
            robot.next_waypoint = (robot.next_waypoint + 1) % robot.waypoints.len();
            if distance == 0.0 {
                break;
            }
        } else {
            robot.position += to_target / distance * budget;
            budget = 0.0;
        }
        if distance > 0.0 {
            robot.heading = to_target.y.atan2(to_target.x).to_degrees();
        }
    }
}
