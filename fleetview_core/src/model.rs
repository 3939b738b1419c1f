//! Canonical fleet model shared by every engine.
//!
//! These types are the strict schema the reconciler produces. Nothing
//! downstream of the reconciler ever sees a raw backend record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable robot identity as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RobotId(pub String);

/// Stable zone identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub String);

/// Floor identifier used by the floor filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FloorId(pub String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $ty {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(RobotId);
string_id!(ZoneId);
string_id!(FloorId);

/// Operational status of a robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotStatus {
    Idle,
    Working,
    Charging,
    Error,
    Offline,
}

impl RobotStatus {
    /// Parses the status vocabulary used by the backend.
    ///
    /// Returns `None` for anything unrecognized; the caller decides the
    /// fallback.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" | "waiting" => Some(Self::Idle),
            "working" | "busy" | "active" | "moving" | "executing" => Some(Self::Working),
            "charging" => Some(Self::Charging),
            "error" | "fault" | "failed" | "emergency" => Some(Self::Error),
            "offline" | "disconnected" => Some(Self::Offline),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Charging => "charging",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }
}

/// Pose of a robot in world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    /// Heading in degrees, normalized to (-180, 180]
    pub orientation: f64,
    pub floor_id: Option<FloorId>,
}

impl Position {
    pub fn new(x: f64, y: f64, orientation: f64) -> Self {
        Self {
            x,
            y,
            orientation: normalize_degrees(orientation),
            floor_id: None,
        }
    }
}

/// Canonical state of one robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub robot_id: RobotId,
    pub name: String,
    pub status: RobotStatus,
    pub position: Position,
    /// Charge in percent, always within [0, 100]
    pub battery_level: f64,
    pub current_task_id: Option<String>,
    /// World units per tick, never negative
    pub speed: f64,
}

impl RobotState {
    pub fn floor_id(&self) -> Option<&FloorId> {
        self.position.floor_id.as_ref()
    }
}

/// Canonical state of one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    pub zone_id: ZoneId,
    pub name: String,
    pub zone_type: String,
    pub floor_id: Option<FloorId>,
}

/// Connection status of the live data feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connecting,
    Live,
    DegradedPolling,
    Closed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::DegradedPolling => "degraded-polling",
            Self::Closed => "closed",
        }
    }
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<Id> {
    pub added: Vec<Id>,
    pub updated: Vec<Id>,
    pub removed: Vec<Id>,
}

impl<Id> ChangeSet<Id> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Added and updated ids, in that order.
    pub fn touched(&self) -> impl Iterator<Item = &Id> {
        self.added.iter().chain(self.updated.iter())
    }
}

impl<Id> Default for ChangeSet<Id> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// A selectable map entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Robot(RobotId),
    Zone(ZoneId),
}

pub type RobotMap = HashMap<RobotId, RobotState>;
pub type ZoneMap = HashMap<ZoneId, ZoneState>;

/// Wraps an angle in degrees into (-180, 180].
pub fn normalize_degrees(degrees: f64) -> f64 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in (-180, 180].
pub fn shortest_angle_delta(from: f64, to: f64) -> f64 {
    normalize_degrees(to - from)
}
