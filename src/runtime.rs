//! Runtime abstraction layer for async operations
//!
//! Tile fetches and background cache refreshes are spawned through
//! [`AsyncSpawner`] so the scheduler and the cache never name a runtime
//! directly. Tokio is the default.

use crate::prelude::{Duration, Future, Pin};

/// A trait for spawning async tasks (object-safe version)
pub trait AsyncSpawner: Send + Sync + 'static {
    /// Spawn a future and return a handle to it
    fn spawn_boxed(
        &self,
        future: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
    ) -> Box<dyn AsyncHandle>;
}

/// Handle to a spawned async task
pub trait AsyncHandle: Send + Sync {
    /// Check if the task is finished
    fn is_finished(&self) -> bool;

    /// Wait for the task to run to completion
    fn join(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Spawn a future on the configured runtime
pub fn spawn<F>(future: F) -> Box<dyn AsyncHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    runtime().spawn_boxed(Box::pin(future))
}

/// Default spawner implementations
pub mod spawners {
    use super::*;

    pub mod tokio_impl {
        use super::*;
        use ::tokio::task::JoinHandle;

        /// Tokio-based async spawner
        pub struct TokioSpawner;

        impl AsyncSpawner for TokioSpawner {
            fn spawn_boxed(
                &self,
                future: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
            ) -> Box<dyn AsyncHandle> {
                let handle = ::tokio::spawn(future);
                Box::new(TokioHandle(handle))
            }
        }

        struct TokioHandle(JoinHandle<()>);

        impl AsyncHandle for TokioHandle {
            fn is_finished(&self) -> bool {
                self.0.is_finished()
            }

            fn join(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(async move {
                    if let Err(e) = self.0.await {
                        if e.is_panic() {
                            log::error!("Spawned task panicked: {}", e);
                        }
                    }
                })
            }
        }
    }
}

/// Async helpers for the loader
pub mod async_utils {
    use super::*;

    /// Run `future` with an optional upper bound. `None` waits forever.
    pub async fn with_timeout<F, T>(limit: Option<Duration>, future: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        match limit {
            Some(limit) => ::tokio::time::timeout(limit, future).await.ok(),
            None => Some(future.await),
        }
    }
}

/// Global runtime instance
static RUNTIME: std::sync::OnceLock<Box<dyn AsyncSpawner>> = std::sync::OnceLock::new();

/// Get the global runtime spawner
pub fn runtime() -> &'static dyn AsyncSpawner {
    RUNTIME
        .get_or_init(|| Box::new(spawners::tokio_impl::TokioSpawner))
        .as_ref()
}
