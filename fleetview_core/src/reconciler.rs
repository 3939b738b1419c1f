//! The "RECONCILER" - single writer of canonical fleet state.
//!
//! Merges snapshots and deltas into the canonical robot and zone maps:
//! 1. Boundary translation (backend key conventions → canonical schema)
//! 2. Defensive coercion (missing numbers fall back to last known values)
//! 3. Per-record isolation (one malformed record never aborts a batch)
//! 4. Removal policy (stream snapshot, poll miss counting, explicit delta removal)
//!
//! Every call returns a `ChangeSet` so downstream engines can work
//! incrementally.

use crate::config::ReconcilerConfig;
use crate::model::{
    ChangeSet, FloorId, Position, RobotId, RobotMap, RobotState, RobotStatus, ZoneId, ZoneMap,
    ZoneState,
};
use crate::wire::{id_string, BatchKind, RobotBatch, ZoneBatch};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Diagnostics kept for inspection; older entries are dropped.
pub const MAX_DIAGNOSTICS: usize = 64;

const ROBOT_ID_KEYS: &[&str] = &["robotId", "robot_id", "id"];
const ZONE_ID_KEYS: &[&str] = &["zoneId", "zone_id", "id"];
const NAME_KEYS: &[&str] = &["name", "robotName", "robot_name"];
const STATUS_KEYS: &[&str] = &["status", "state"];
const BATTERY_KEYS: &[&str] = &["batteryLevel", "battery_level", "battery"];
const TASK_KEYS: &[&str] = &[
    "currentTaskId",
    "current_task_id",
    "currentTask",
    "current_task",
    "taskId",
    "task_id",
];
const SPEED_KEYS: &[&str] = &["speed", "velocity"];
const POSITION_KEYS: &[&str] = &["position", "pose", "location"];
const FLOOR_KEYS: &[&str] = &["floorId", "floor_id", "floor"];
const ORIENTATION_KEYS: &[&str] = &["orientation", "theta", "heading", "angle"];
const ZONE_NAME_KEYS: &[&str] = &["name", "zoneName", "zone_name"];
const ZONE_TYPE_KEYS: &[&str] = &["zoneType", "zone_type", "type"];

/// Kind of entity a diagnostic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Robot,
    Zone,
}

/// Why a record was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedEntity {
    #[error("record is not an object")]
    NotAnObject,

    #[error("record has no usable id")]
    MissingId,

    #[error("position is null")]
    NullPosition,

    #[error("position is missing on a robot seen for the first time")]
    MissingPosition,

    #[error("position is not an object")]
    PositionNotObject,

    #[error("coordinate '{0}' is missing or not a finite number")]
    InvalidCoordinate(&'static str),
}

/// A skipped record, kept for display and debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: EntityKind,
    pub id: Option<String>,
    pub error: MalformedEntity,
}

/// Canonical entity store.
pub struct Reconciler {
    config: ReconcilerConfig,
    robots: RobotMap,
    zones: ZoneMap,
    /// Consecutive poll snapshots each robot was missing from
    poll_misses: HashMap<RobotId, u32>,
    diagnostics: VecDeque<Diagnostic>,
    skipped_total: u64,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            robots: HashMap::new(),
            zones: HashMap::new(),
            poll_misses: HashMap::new(),
            diagnostics: VecDeque::with_capacity(MAX_DIAGNOSTICS),
            skipped_total: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ReconcilerConfig::default())
    }

    // ========================================================================
    // ROBOTS
    // ========================================================================

    /// Merges one robot batch into canonical state.
    pub fn apply_robot_update(&mut self, batch: RobotBatch) -> ChangeSet<RobotId> {
        let RobotBatch {
            kind,
            records,
            removed: explicit_removals,
        } = batch;

        // Pre-batch state of every id touched, in first-sighting order
        let mut first_seen: Vec<RobotId> = Vec::new();
        let mut before: HashMap<RobotId, Option<RobotState>> = HashMap::new();
        // Ids the batch mentions, including records that were skipped
        let mut present: HashSet<RobotId> = HashSet::new();

        for record in &records {
            match self.normalize_robot(record, kind) {
                Ok(state) => {
                    let id = state.robot_id.clone();
                    present.insert(id.clone());
                    let previous = self.robots.insert(id.clone(), state);
                    if !before.contains_key(&id) {
                        before.insert(id.clone(), previous);
                        first_seen.push(id);
                    }
                }
                Err((raw_id, error)) => {
                    if let Some(raw) = &raw_id {
                        present.insert(RobotId::new(raw.clone()));
                    }
                    self.record_diagnostic(EntityKind::Robot, raw_id, error);
                }
            }
        }

        let mut to_remove: Vec<RobotId> = match kind {
            BatchKind::StreamSnapshot => self
                .robots
                .keys()
                .filter(|id| !present.contains(*id))
                .cloned()
                .collect(),
            BatchKind::PollSnapshot => {
                let threshold = self.config.poll_miss_threshold;
                let mut expired = Vec::new();
                for id in self.robots.keys() {
                    if present.contains(id) {
                        continue;
                    }
                    let misses = self.poll_misses.entry(id.clone()).or_insert(0);
                    *misses += 1;
                    debug!(robot = %id, misses = *misses, "robot missing from poll");
                    if *misses >= threshold {
                        expired.push(id.clone());
                    }
                }
                expired
            }
            BatchKind::Delta => explicit_removals.into_iter().map(RobotId::new).collect(),
        };
        if kind == BatchKind::PollSnapshot {
            for id in &present {
                self.poll_misses.remove(id);
            }
        } else {
            // Misses only count across consecutive pulls
            self.poll_misses.clear();
        }
        to_remove.sort();
        to_remove.dedup();

        let mut changes = ChangeSet::default();
        for id in to_remove {
            if self.robots.remove(&id).is_some() {
                self.poll_misses.remove(&id);
                let existed_before = before.get(&id).map_or(true, |b| b.is_some());
                if existed_before {
                    changes.removed.push(id);
                }
            }
        }

        for id in first_seen {
            let Some(current) = self.robots.get(&id) else {
                continue;
            };
            match before.get(&id) {
                Some(None) => changes.added.push(id),
                Some(Some(old)) if old != current => changes.updated.push(id),
                _ => {}
            }
        }

        debug!(
            kind = ?kind,
            added = changes.added.len(),
            updated = changes.updated.len(),
            removed = changes.removed.len(),
            "robot batch reconciled"
        );
        changes
    }

    /// Translates one raw record into canonical form.
    ///
    /// On failure returns the raw id (when one could be read) with the reason.
    fn normalize_robot(
        &self,
        record: &Value,
        kind: BatchKind,
    ) -> Result<RobotState, (Option<String>, MalformedEntity)> {
        let Value::Object(fields) = record else {
            return Err((None, MalformedEntity::NotAnObject));
        };
        let id = read_id(fields, ROBOT_ID_KEYS).ok_or((None, MalformedEntity::MissingId))?;
        let robot_id = RobotId::new(id.clone());
        let previous = self.robots.get(&robot_id);

        let position =
            parse_position(fields, previous.map(|p| &p.position)).map_err(|e| (Some(id.clone()), e))?;

        let name = read_string(fields, NAME_KEYS)
            .or_else(|| previous.map(|p| p.name.clone()))
            .unwrap_or_else(|| id.clone());

        let status = match read_string(fields, STATUS_KEYS) {
            Some(raw) => RobotStatus::parse(&raw).unwrap_or_else(|| {
                debug!(robot = %id, status = %raw, "unknown status, keeping last known");
                previous.map_or(RobotStatus::Idle, |p| p.status)
            }),
            None => previous.map_or(RobotStatus::Idle, |p| p.status),
        };

        let battery_level = read_number(fields, BATTERY_KEYS)
            .map(|b| b.clamp(0.0, 100.0))
            .or_else(|| previous.map(|p| p.battery_level))
            .unwrap_or(self.config.default_battery_level);

        let current_task_id = match field(fields, TASK_KEYS) {
            Field::Value(value) => task_id(value),
            Field::Null => None,
            Field::Missing if kind == BatchKind::Delta => {
                previous.and_then(|p| p.current_task_id.clone())
            }
            Field::Missing => None,
        };

        let speed = read_number(fields, SPEED_KEYS)
            .map(|s| s.abs())
            .or_else(|| previous.map(|p| p.speed))
            .unwrap_or(0.0);

        Ok(RobotState {
            robot_id,
            name,
            status,
            position,
            battery_level,
            current_task_id,
            speed,
        })
    }

    // ========================================================================
    // ZONES
    // ========================================================================

    /// Merges one zone batch into canonical state.
    pub fn apply_zone_update(&mut self, batch: ZoneBatch) -> ChangeSet<ZoneId> {
        let mut changes = ChangeSet::default();
        let mut present: HashSet<ZoneId> = HashSet::new();
        let mut first_seen: Vec<ZoneId> = Vec::new();
        let mut before: HashMap<ZoneId, Option<ZoneState>> = HashMap::new();

        for record in &batch.records {
            match self.normalize_zone(record) {
                Ok(zone) => {
                    let id = zone.zone_id.clone();
                    present.insert(id.clone());
                    let previous = self.zones.insert(id.clone(), zone);
                    if !before.contains_key(&id) {
                        before.insert(id.clone(), previous);
                        first_seen.push(id);
                    }
                }
                Err((raw_id, error)) => {
                    if let Some(raw) = &raw_id {
                        present.insert(ZoneId::new(raw.clone()));
                    }
                    self.record_diagnostic(EntityKind::Zone, raw_id, error);
                }
            }
        }

        let mut to_remove: Vec<ZoneId> = if batch.full {
            self.zones
                .keys()
                .filter(|id| !present.contains(*id))
                .cloned()
                .collect()
        } else {
            batch.removed.into_iter().map(ZoneId::new).collect()
        };
        to_remove.sort();
        to_remove.dedup();

        for id in to_remove {
            if self.zones.remove(&id).is_some() && before.get(&id).map_or(true, |b| b.is_some()) {
                changes.removed.push(id);
            }
        }
        for id in first_seen {
            let Some(current) = self.zones.get(&id) else {
                continue;
            };
            match before.get(&id) {
                Some(None) => changes.added.push(id),
                Some(Some(old)) if old != current => changes.updated.push(id),
                _ => {}
            }
        }
        changes
    }

    fn normalize_zone(&self, record: &Value) -> Result<ZoneState, (Option<String>, MalformedEntity)> {
        let Value::Object(fields) = record else {
            return Err((None, MalformedEntity::NotAnObject));
        };
        let id = read_id(fields, ZONE_ID_KEYS).ok_or((None, MalformedEntity::MissingId))?;
        let previous = self.zones.get(&ZoneId::new(id.clone()));

        Ok(ZoneState {
            zone_id: ZoneId::new(id.clone()),
            name: read_string(fields, ZONE_NAME_KEYS)
                .or_else(|| previous.map(|z| z.name.clone()))
                .unwrap_or_else(|| id.clone()),
            zone_type: read_string(fields, ZONE_TYPE_KEYS)
                .or_else(|| previous.map(|z| z.zone_type.clone()))
                .unwrap_or_else(|| "unknown".to_string()),
            floor_id: read_floor(fields).or_else(|| previous.and_then(|z| z.floor_id.clone())),
        })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    fn record_diagnostic(&mut self, kind: EntityKind, id: Option<String>, error: MalformedEntity) {
        warn!(entity = ?kind, id = ?id, error = %error, "skipping malformed record");
        self.skipped_total += 1;
        if self.diagnostics.len() == MAX_DIAGNOSTICS {
            self.diagnostics.pop_front();
        }
        self.diagnostics.push_back(Diagnostic { kind, id, error });
    }

    pub fn robots(&self) -> &RobotMap {
        &self.robots
    }

    pub fn robot(&self, id: &RobotId) -> Option<&RobotState> {
        self.robots.get(id)
    }

    pub fn zones(&self) -> &ZoneMap {
        &self.zones
    }

    pub fn zone(&self, id: &ZoneId) -> Option<&ZoneState> {
        self.zones.get(id)
    }

    /// Most recent skipped records, oldest first.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Total records skipped since creation.
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    /// Every floor referenced by a robot or a zone, sorted.
    pub fn floors(&self) -> Vec<FloorId> {
        let mut floors: Vec<FloorId> = self
            .robots
            .values()
            .filter_map(|r| r.position.floor_id.clone())
            .chain(self.zones.values().filter_map(|z| z.floor_id.clone()))
            .collect();
        floors.sort();
        floors.dedup();
        floors
    }
}

// ============================================================================
// FIELD COERCION
// ============================================================================

enum Field<'a> {
    Missing,
    Null,
    Value(&'a Value),
}

/// First non-null value among `keys`; `Null` if only nulls were present.
fn field<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Field<'a> {
    let mut saw_null = false;
    for key in keys {
        match fields.get(*key) {
            Some(Value::Null) => saw_null = true,
            Some(value) => return Field::Value(value),
            None => {}
        }
    }
    if saw_null {
        Field::Null
    } else {
        Field::Missing
    }
}

fn read_id(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(fields, keys) {
        Field::Value(value) => id_string(value.clone()),
        _ => None,
    }
}

fn read_string(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(fields, keys) {
        Field::Value(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Field::Value(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers and numeric strings; never NaN or infinite.
fn read_number(fields: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    match field(fields, keys) {
        Field::Value(value) => number(value),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn read_floor(fields: &Map<String, Value>) -> Option<FloorId> {
    match field(fields, FLOOR_KEYS) {
        Field::Value(value) => id_string(value.clone()).map(FloorId::new),
        _ => None,
    }
}

fn task_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(task) => task.get("id").cloned().and_then(id_string),
        other => id_string(other.clone()),
    }
}

/// Reads a pose from a nested position object or from flat `x`/`y` fields.
///
/// Heading and floor may live on either the position object or the record;
/// both fall back to the previous pose.
fn parse_position(
    fields: &Map<String, Value>,
    previous: Option<&Position>,
) -> Result<Position, MalformedEntity> {
    let coords: &Map<String, Value> = match field(fields, POSITION_KEYS) {
        Field::Value(Value::Object(pos)) => pos,
        Field::Value(_) => return Err(MalformedEntity::PositionNotObject),
        Field::Null => return Err(MalformedEntity::NullPosition),
        Field::Missing if fields.contains_key("x") || fields.contains_key("y") => fields,
        Field::Missing => {
            return previous.cloned().ok_or(MalformedEntity::MissingPosition);
        }
    };

    let x = read_number(coords, &["x"]).ok_or(MalformedEntity::InvalidCoordinate("x"))?;
    let y = read_number(coords, &["y"]).ok_or(MalformedEntity::InvalidCoordinate("y"))?;
    let orientation = read_number(coords, ORIENTATION_KEYS)
        .or_else(|| read_number(fields, ORIENTATION_KEYS))
        .or_else(|| previous.map(|p| p.orientation))
        .unwrap_or(0.0);
    let floor_id = read_floor(coords)
        .or_else(|| read_floor(fields))
        .or_else(|| previous.and_then(|p| p.floor_id.clone()));

    let mut position = Position::new(x, y, orientation);
    position.floor_id = floor_id;
    Ok(position)
}

// ============================================================================
// TESTS
// ============================================================================
