//! FleetView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the FleetView engine run
//! against a real backend (tokio, WebSocket, REST) or inside the simulation
//! harness with a paused clock and a scripted fleet.
//!
//! # Core Concept
//!
//! The engine never touches sockets or wall clocks directly. Everything that
//! can block or fail is behind a trait:
//! - Time and task spawning (`FleetContext`)
//! - Streaming updates (`StreamConnector` / `StreamSession`)
//! - Periodic pulls (`StatusPoller`)
//!
//! # Example
//!
//! ```ignore
//! use fleetview_env::{Endpoint, FleetContext, StreamConnector, TokioContext, WsConnector};
//!
//! async fn first_frame(connector: &WsConnector) -> Option<String> {
//!     let endpoint = Endpoint::from_base("http://fleet.local:8000").ok()?;
//!     let mut session = connector.connect(&endpoint).await.ok()?;
//!     session.recv().await?.ok()
//! }
//! ```

mod backend;
mod context;
mod error;
mod http_impl;
mod tokio_impl;
mod types;
mod ws_impl;

pub use backend::{StatusPoller, StreamConnector, StreamSession};
pub use context::FleetContext;
pub use error::EnvError;
pub use http_impl::HttpPoller;
pub use tokio_impl::TokioContext;
pub use types::{Endpoint, TaskHandle};
pub use ws_impl::WsConnector;
