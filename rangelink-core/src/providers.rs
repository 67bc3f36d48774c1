//! Provider bundle trait for simplified type parameters.
//!
//! Without bundling, every connector would carry three type parameters
//! (`N: NetworkProvider, T: TimeProvider, TP: TaskProvider`). The bundle
//! collapses them into a single `P: Providers`.
//!
//! ```rust,ignore
//! use rangelink_core::{Providers, TokioProviders};
//!
//! let providers = TokioProviders::new();
//! providers.time().sleep(Duration::from_millis(10)).await;
//! ```

use crate::{
    NetworkProvider, TaskProvider, TimeProvider, TokioNetworkProvider, TokioTaskProvider,
    TokioTimeProvider,
};

/// Bundle of all provider types for a runtime environment.
///
/// ## Implementations
///
/// - [`TokioProviders`]: production providers using the real Tokio runtime
/// - `SimProviders` (in rangelink-sim): in-memory network for tests
pub trait Providers: Clone + Send + Sync + 'static {
    /// Network provider type for TCP connections and listeners.
    type Network: NetworkProvider;

    /// Time provider type for sleep, timeout, and time queries.
    type Time: TimeProvider;

    /// Task provider type for spawning background tasks.
    type Task: TaskProvider;

    /// Get the network provider instance.
    fn network(&self) -> &Self::Network;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;
}

/// Production providers using Tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioProviders {
    network: TokioNetworkProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self {
            network: TokioNetworkProvider::new(),
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Network = TokioNetworkProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }
}
