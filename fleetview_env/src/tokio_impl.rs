//! Production implementation of FleetContext using Tokio.

use crate::types::TaskHandle;
use crate::FleetContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Production context backed by the Tokio runtime.
///
/// The clock is `tokio::time::Instant`, so a runtime started with a paused
/// clock (tests, simulation) advances it deterministically.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FleetContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "spawning task");
        let join = tokio::spawn(future);
        TaskHandle::new(name, join.abort_handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_follows_paused_clock() {
        let ctx = TokioContext::new();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(ctx.now() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_spawned_task_can_be_aborted() {
        let ctx = TokioContext::new();
        let handle = ctx.spawn("forever", async {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
        assert_eq!(handle.name(), "forever");
        handle.abort();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(handle.is_finished());
    }
}
