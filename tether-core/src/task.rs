//! Task spawning abstraction for single-threaded environments.

use std::future::Future;

/// Provider for spawning local tasks in a single-threaded context.
///
/// Every task the client starts (reader, writer, heartbeat, sweep, drain,
/// response timers) goes through this trait so it stays on the current
/// thread and can hold `Rc` state.
pub trait TaskProvider: Clone {
    /// Spawn a named task that runs on the current thread.
    ///
    /// Must be called from within a `tokio::task::LocalSet`.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Tokio-based task provider using `spawn_local`.
#[derive(Clone, Debug, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!("Task {} starting", task_name);
            future.await;
            tracing::trace!("Task {} completed", task_name);
        })
    }
}
