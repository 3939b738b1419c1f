//! FleetView Deterministic Simulation Harness
//!
//! Runs the real `VisualizationController` against a simulated fleet
//! backend on a paused tokio clock, so every failover and teardown path
//! can be replayed from a single seed.
//!
//! # Core Principle: Ground Truth vs. Rendered State
//!
//! - **Oracle**: owns the true fleet (positions, status, battery) and
//!   produces backend payloads, optionally with noise and malformed records
//! - **Backend**: serves the oracle through the same stream and poll traits
//!   as the production clients, with injectable refusals, drops, latency
//!   and HTTP failures
//! - **Runner**: steps oracle and controller frame by frame and checks the
//!   rendered scene against ground truth
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │ tokio current-thread runtime (paused clock)          │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │  ┌─────────────┐   stream / poll   ┌────────────────────┐  │
//! │  │ SimBackend  │◄─────────────────►│ Visualization      │  │
//! │  │ (faults)    │                   │ Controller         │  │
//! │  └──────▲──────┘                   └────────────────────┘  │
//! │         │                                                  │
//! │  ┌──────┴──────┐                                           │
//! │  │ FleetOracle │  ground truth                             │
//! │  └─────────────┘                                           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fleetview_sim::{ScenarioId, ScenarioRunner};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::StreamDrop);
//! assert!(result.passed);
//! ```

mod backend;
mod oracle;
mod runner;
pub mod scenarios;

pub use backend::{SimBackend, SimBackendController};
pub use oracle::{FleetOracle, SimRobot, SimZone};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, SimError};
pub use scenarios::ScenarioId;
