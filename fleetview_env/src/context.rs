//! Core environment context trait for FleetView.

use crate::types::TaskHandle;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for environment interaction.
///
/// Abstracts the clock and the task scheduler so the transport manager and
/// the visualization controller can run under a real runtime or under a
/// paused, manually advanced clock in tests and simulation.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
#[async_trait]
pub trait FleetContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// Used for interpolation frame deltas and trail timestamps.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task and returns a handle that can cancel it.
    ///
    /// The handle does not cancel on drop; owners call `TaskHandle::abort`
    /// during teardown.
    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static;
}
