//! Running a job of participants on threads of the current process.

use std::panic;
use std::sync::Arc;
use std::thread;

use parcomm::Native;
use tracing::{error, info, info_span};

use crate::config::{ConfigError, UniverseConfig};
use crate::process::LocalProcess;
use crate::state::Shared;

/// A set of participants sharing one in-process communication substrate.
///
/// A universe hosts a single job: each participant initializes and
/// finalizes once, so [`LocalUniverse::run`] is meant to be called once per
/// universe. Resource counters stay readable afterwards, which makes leaks
/// visible to tests.
pub struct LocalUniverse {
    config: UniverseConfig,
    shared: Arc<Shared>,
}

/// Marks the universe as aborted if its participant unwinds, so peers
/// blocked on it fail instead of hanging.
struct PanicSentinel<'a> {
    shared: &'a Shared,
    rank: usize,
}

impl Drop for PanicSentinel<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(rank = self.rank, "participant panicked, aborting universe");
            self.shared.abort();
        }
    }
}

impl LocalUniverse {
    /// A universe shaped by `config`.
    pub fn new(config: UniverseConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new(config)),
        }
    }

    /// A universe of `world_size` participants on one node.
    pub fn with_size(world_size: usize) -> Result<Self, ConfigError> {
        Ok(Self::new(UniverseConfig::new(world_size)?))
    }

    /// The configuration this universe was built from.
    pub fn config(&self) -> &UniverseConfig {
        &self.config
    }

    /// Number of participants.
    pub fn size(&self) -> usize {
        self.config.world_size()
    }

    /// The library as seen by participant `rank`, for driving a participant
    /// by hand.
    pub fn process(&self, rank: usize) -> Option<Arc<dyn Native>> {
        (rank < self.size()).then(|| Arc::new(LocalProcess::new(rank, Arc::clone(&self.shared))) as Arc<dyn Native>)
    }

    /// Run `body` once per participant, each on its own thread, and collect
    /// the results in rank order.
    ///
    /// A panic in any participant aborts the universe, which fails every
    /// blocked peer with `ERR_INTERN`, and is then re-raised here.
    pub fn run<R, F>(&self, body: F) -> Vec<R>
    where
        F: Fn(Arc<dyn Native>) -> R + Sync,
        R: Send,
    {
        info!(world_size = self.size(), "starting universe");
        let body = &body;
        let outcomes: Vec<thread::Result<R>> = thread::scope(|scope| {
            let participants: Vec<_> = (0..self.size())
                .map(|rank| {
                    let shared = &*self.shared;
                    let native: Arc<dyn Native> = Arc::new(LocalProcess::new(rank, Arc::clone(&self.shared)));
                    scope.spawn(move || {
                        let _span = info_span!("participant", rank).entered();
                        let _sentinel = PanicSentinel { shared, rank };
                        body(native)
                    })
                })
                .collect();
            participants.into_iter().map(thread::ScopedJoinHandle::join).collect()
        });
        info!(world_size = self.size(), "universe finished");
        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect()
    }

    /// Derived communicators, datatypes and operators not yet released.
    pub fn live_handles(&self) -> usize {
        self.shared.lock().live_handles()
    }

    /// Requests not yet completed.
    pub fn outstanding_requests(&self) -> usize {
        self.shared.lock().outstanding_requests()
    }
}

impl std::fmt::Debug for LocalUniverse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalUniverse").field("config", &self.config).finish_non_exhaustive()
    }
}
