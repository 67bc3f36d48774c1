//! Task spawning abstraction.

use std::future::Future;
use tokio::task::JoinHandle;

/// Provider trait for spawning background tasks.
///
/// Connection drivers (the hyper half that pumps bytes on a session) are
/// spawned through this trait so tests can observe or replace scheduling.
pub trait TaskProvider: Clone + Send + Sync + 'static {
    /// Spawn a named task onto the runtime.
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-backed task provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, "spawning task");
        tokio::spawn(future)
    }
}
