//! Provider bundle trait for simplified type parameters.
//!
//! Without bundling, every client type would carry three separate provider
//! parameters. [`Providers`] folds them into one:
//!
//! ```text
//! struct Supervisor<P: Providers, T: Transport, S: KeyValueStore>
//! ```

use crate::{
    RandomProvider, TaskProvider, TimeProvider, TokioRandomProvider, TokioTaskProvider,
    TokioTimeProvider,
};

/// Bundle of runtime providers.
///
/// Storage is deliberately not part of the bundle: the client receives its
/// [`KeyValueStore`](crate::KeyValueStore) separately because production
/// setups pick the storage location at runtime.
pub trait Providers: Clone + 'static {
    /// Time provider type for sleep, timeout, and time queries.
    type Time: TimeProvider + Clone + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + Clone + 'static;

    /// Random provider type for backoff jitter.
    type Random: RandomProvider + Clone + 'static;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;

    /// Get the random provider instance.
    fn random(&self) -> &Self::Random;
}

/// Production providers using the Tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioProviders {
    time: TokioTimeProvider,
    task: TokioTaskProvider,
    random: TokioRandomProvider,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self {
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
            random: TokioRandomProvider::new(),
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;
    type Random = TokioRandomProvider;

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}
