//! FleetView Core - Live Fleet Visualization Engine
//!
//! This library turns an unreliable, inconsistently shaped robot feed into a
//! smooth, consistent map view:
//! 1. **Transport**: streaming first, periodic polling as fallback, one mechanism at a time
//! 2. **Reconciliation**: one strict trust boundary producing canonical robot and zone maps
//! 3. **Rendering state**: interpolated poses, decaying occupancy heatmap, bounded path trails
//!
//! Canonical state moves only when the backend says so; everything drawn is
//! derived from it on the frame clock by the `VisualizationController`.

pub mod config;
pub mod controller;
pub mod heatmap;
pub mod interpolation;
pub mod model;
pub mod reconciler;
pub mod trails;
pub mod transport;
pub mod view;
pub mod wire;

#[cfg(feature = "dashboard")]
pub mod dashboard;

// Re-export key types for convenience
pub use config::{ConfigError, FleetViewConfig};
pub use controller::{ControllerError, ControllerPhase, Scene, VisualizationController};
pub use heatmap::{HeatCell, HeatmapAccumulator, HeatmapMode};
pub use interpolation::{InterpolatedRobotView, MotionInterpolator};
pub use model::{
    ChangeSet, ConnectionState, EntityRef, FloorId, Position, RobotId, RobotState, RobotStatus, ZoneId,
    ZoneState,
};
pub use reconciler::{Diagnostic, MalformedEntity, Reconciler};
pub use trails::{PathTrailPoint, PathTrailTracker};
pub use transport::{ConnectionUpdate, TransportHandle, TransportManager};
pub use view::{ViewState, ViewTransform};
pub use wire::{FleetEvent, WireError};
