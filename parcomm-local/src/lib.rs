//! `parcomm-local` - an in-process communication substrate for `parcomm`
//!
//! Runs every participant of a job as a thread of the current process and
//! implements [`parcomm::Native`] on top of shared memory, so programs built
//! on `parcomm` can be developed and tested without a cluster:
//!
//! ```rust,ignore
//! use parcomm::prelude::*;
//! use parcomm_local::LocalUniverse;
//!
//! let universe = LocalUniverse::with_size(4)?;
//! let totals = universe.run(|native| -> Result<f64> {
//!     let env = Environment::new(native)?;
//!     let world = env.world();
//!     let mut total = [0.0];
//!     world.iallreduce(&[1.0], &mut total, &Op::sum(std::sync::Arc::clone(env.native())))?.wait()?;
//!     Ok(total[0])
//! });
//! ```
//!
//! Sends complete eagerly, collectives complete once every member has
//! joined, and a participant that panics aborts the whole universe.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod process;
mod reduce;
mod state;
mod universe;

pub use config::{ConfigError, RanksPerNode, UniverseConfig, WorldSize};
pub use process::LocalProcess;
pub use universe::LocalUniverse;
