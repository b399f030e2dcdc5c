//! Shared helpers for running a job body on every participant.

use parcomm::prelude::*;
use parcomm_local::LocalUniverse;

/// Run `body` on every participant of `universe` inside an [`Environment`],
/// failing the test if any participant fails.
pub fn run_in<R: Send>(universe: &LocalUniverse, body: impl Fn(&Environment) -> Result<R> + Sync) -> Vec<R> {
    universe
        .run(|native| {
            let env = Environment::new(native)?;
            body(&env)
        })
        .into_iter()
        .enumerate()
        .map(|(rank, outcome)| outcome.unwrap_or_else(|error| panic!("rank {rank} failed: {error}")))
        .collect()
}

/// [`run_in`] on a fresh universe of `size` participants, which must not
/// leak any handle or request.
pub fn on_each<R: Send>(size: usize, body: impl Fn(&Environment) -> Result<R> + Sync) -> Vec<R> {
    let universe = LocalUniverse::with_size(size).unwrap();
    let results = run_in(&universe, body);
    assert_eq!(universe.live_handles(), 0, "leaked handles");
    assert_eq!(universe.outstanding_requests(), 0, "leaked requests");
    results
}
