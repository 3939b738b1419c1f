//! Configuration for every FleetView engine.
//!
//! All values have defaults; a JSON file may override any subset of them.

use crate::heatmap::HeatmapMode;
use crate::model::FloorId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration consumed by the visualization controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetViewConfig {
    pub transport: TransportConfig,
    pub reconciler: ReconcilerConfig,
    pub interpolation: InterpolationConfig,
    pub heatmap: HeatmapConfig,
    pub trails: TrailConfig,
    pub view: ViewConfig,
}

impl FleetViewConfig {
    /// Parses a (possibly partial) JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Rejects values that would break an engine invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transport;
        if t.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("transport.poll_interval_ms", "must be > 0"));
        }
        if t.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("transport.request_timeout_ms", "must be > 0"));
        }
        if t.stream_retry_interval_ms == Some(0) {
            return Err(ConfigError::invalid(
                "transport.stream_retry_interval_ms",
                "must be > 0 (use null to disable retries)",
            ));
        }
        if t.zone_refresh_interval_ms == 0 {
            return Err(ConfigError::invalid("transport.zone_refresh_interval_ms", "must be > 0"));
        }

        if self.reconciler.poll_miss_threshold == 0 {
            return Err(ConfigError::invalid("reconciler.poll_miss_threshold", "must be >= 1"));
        }
        if !(0.0..=100.0).contains(&self.reconciler.default_battery_level) {
            return Err(ConfigError::invalid("reconciler.default_battery_level", "must be within [0, 100]"));
        }

        let i = &self.interpolation;
        if !(i.smoothing > 0.0 && i.smoothing <= 1.0) {
            return Err(ConfigError::invalid("interpolation.smoothing", "must be within (0, 1]"));
        }
        if !(i.snap_epsilon >= 0.0) {
            return Err(ConfigError::invalid("interpolation.snap_epsilon", "must be >= 0"));
        }
        if !(i.frame_rate_hz > 0.0) {
            return Err(ConfigError::invalid("interpolation.frame_rate_hz", "must be > 0"));
        }

        let h = &self.heatmap;
        if !(h.cell_size > 0.0) {
            return Err(ConfigError::invalid("heatmap.cell_size", "must be > 0"));
        }
        if !(h.decay > 0.0 && h.decay < 1.0) {
            return Err(ConfigError::invalid("heatmap.decay", "must be within (0, 1)"));
        }
        if !(h.increment > 0.0) || !(h.max_density >= h.increment) {
            return Err(ConfigError::invalid("heatmap.max_density", "must be >= increment > 0"));
        }

        if self.trails.capacity == 0 {
            return Err(ConfigError::invalid("trails.capacity", "must be >= 1"));
        }
        if !(self.trails.min_distance >= 0.0) {
            return Err(ConfigError::invalid("trails.min_distance", "must be >= 0"));
        }

        let v = &self.view;
        if v.zoom_step_percent == 0 {
            return Err(ConfigError::invalid("view.zoom_step_percent", "must be > 0"));
        }
        if v.min_zoom_percent == 0 || v.min_zoom_percent > v.max_zoom_percent {
            return Err(ConfigError::invalid("view.min_zoom_percent", "must be > 0 and <= max_zoom_percent"));
        }
        if !(v.min_zoom_percent..=v.max_zoom_percent).contains(&v.initial_zoom_percent) {
            return Err(ConfigError::invalid("view.initial_zoom_percent", "must be within [min, max]"));
        }
        if !(v.pixels_per_unit > 0.0) {
            return Err(ConfigError::invalid("view.pixels_per_unit", "must be > 0"));
        }

        Ok(())
    }
}

/// Transport manager timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Pull cadence while degraded (default: 2000 ms)
    pub poll_interval_ms: u64,

    /// Stream reconnect cadence while polling; `None` disables (default: 10000 ms)
    pub stream_retry_interval_ms: Option<u64>,

    /// Upper bound on a connect or a single pull (default: 5000 ms)
    pub request_timeout_ms: u64,

    /// Zone re-fetch cadence while polling (default: 30000 ms)
    pub zone_refresh_interval_ms: u64,
}

impl TransportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stream_retry_interval(&self) -> Option<Duration> {
        self.stream_retry_interval_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn zone_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.zone_refresh_interval_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            stream_retry_interval_ms: Some(10_000),
            request_timeout_ms: 5_000,
            zone_refresh_interval_ms: 30_000,
        }
    }
}

/// Reconciler coercion and removal policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Consecutive poll snapshots a robot may be missing from before removal (default: 3)
    pub poll_miss_threshold: u32,

    /// Battery used when a new robot reports none (default: 0.0)
    pub default_battery_level: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_miss_threshold: 3,
            default_battery_level: 0.0,
        }
    }
}

/// Motion smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Fraction of the remaining distance covered per nominal frame (default: 0.2)
    pub smoothing: f64,

    /// Distance (world units, and degrees for heading) under which a pose snaps onto its target (default: 0.001)
    pub snap_epsilon: f64,

    /// Target rendering rate (default: 60 Hz)
    pub frame_rate_hz: f64,
}

impl InterpolationConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_hz)
    }
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.2,
            snap_epsilon: 0.001,
            frame_rate_hz: 60.0,
        }
    }
}

/// Occupancy heatmap grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Cell edge length in world units (default: 1.0)
    pub cell_size: f64,

    /// Multiplicative decay per tick (default: 0.98)
    pub decay: f64,

    /// Density added per robot per tick (default: 1.0)
    pub increment: f64,

    /// Density cap per cell (default: 10.0)
    pub max_density: f64,

    /// Cells at or below this density are not rendered (default: 0.05)
    pub render_threshold: f64,

    /// Behavior while the heatmap is hidden (default: background accumulation)
    pub mode: HeatmapMode,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            cell_size: 1.0,
            decay: 0.98,
            increment: 1.0,
            max_density: 10.0,
            render_threshold: 0.05,
            mode: HeatmapMode::Background,
        }
    }
}

/// Path trails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailConfig {
    /// Points kept per robot (default: 50)
    pub capacity: usize,

    /// Minimum movement before a new point is recorded (default: 0.25)
    pub min_distance: f64,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            min_distance: 0.25,
        }
    }
}

/// Zoom, projection and initial view toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub zoom_step_percent: u32,
    pub min_zoom_percent: u32,
    pub max_zoom_percent: u32,
    pub initial_zoom_percent: u32,

    /// Screen units per world unit at 100% zoom (default: 20.0)
    pub pixels_per_unit: f64,

    /// Screen position of the world origin before panning
    pub origin: [f64; 2],

    pub initial_floor_id: Option<FloorId>,
    pub show_heatmap: bool,
    pub show_paths: bool,

    /// Click tolerance for robot picking, in screen units (default: 12.0)
    pub pick_radius_px: f64,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            zoom_step_percent: 25,
            min_zoom_percent: 25,
            max_zoom_percent: 400,
            initial_zoom_percent: 100,
            pixels_per_unit: 20.0,
            origin: [0.0, 0.0],
            initial_floor_id: None,
            show_heatmap: false,
            show_paths: true,
            pick_radius_px: 12.0,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Config read error: {0}")]
    Io(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}
