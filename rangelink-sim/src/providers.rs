//! Provider bundle for tests.

use rangelink_core::{Providers, TokioTaskProvider, TokioTimeProvider};

use crate::network::SimNetworkProvider;

/// Simulated network with real (or paused) Tokio time and task spawning.
///
/// Time is Tokio time so tests can run under `start_paused = true`.
#[derive(Clone, Debug, Default)]
pub struct SimProviders {
    network: SimNetworkProvider,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
}

impl SimProviders {
    /// Create a bundle around a fresh network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bundle sharing an existing network.
    pub fn with_network(network: SimNetworkProvider) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }
}

impl Providers for SimProviders {
    type Network = SimNetworkProvider;
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
