//! `parcomm` - owned handles over a parallel-communication library
//!
//! The native library exposes communicators, datatypes, reduction operators
//! and in-flight operations as bare integer handles, and reports every
//! failure as a returned status code. This crate puts a safe layer on top:
//!
//! - every native status code goes through one error channel and comes out
//!   as an [`Error`];
//! - resources are [`OwnedHandle`]s with a single releaser and move-only
//!   ownership, so nothing is freed twice and predefined handles are never
//!   freed;
//! - non-blocking operations return a [`Request`] that borrows the caller's
//!   buffer and waits for the operation if it is dropped early;
//! - [`Communicator`] is the surface operations are issued through;
//! - [`Environment`] initializes and finalizes the runtime idempotently.
//!
//! The library itself is reached through the [`Native`] trait. Any
//! implementation works; `parcomm-local` provides an in-process one.
//!
//! ```rust,ignore
//! use parcomm::prelude::*;
//!
//! let env = Environment::new(native)?;
//! let world = env.world();
//! let mut total = [0.0f64];
//! world.iallreduce(&[1.0], &mut total, &Op::sum(Arc::clone(env.native())))?.wait()?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod comm;
pub mod datatype;
pub mod environment;
pub mod errors;
pub mod handle;
pub mod native;
pub mod op;
pub mod request;
pub mod status;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use comm::{CartTopology, Communicator, SplitType};
pub use datatype::{datatype_of, Datatype, Equivalence};
pub use environment::Environment;
pub use errors::{Error, Result};
pub use handle::{HandleKind, OwnedHandle};
pub use native::{Native, ANY_SOURCE, ANY_TAG, PROC_NULL, UNDEFINED};
pub use op::Op;
pub use request::{test_all, wait_all, Request};
pub use status::Status;

/// The types most programs need.
pub mod prelude {
    pub use crate::comm::{CartTopology, Communicator, SplitType};
    pub use crate::datatype::{Datatype, Equivalence};
    pub use crate::environment::Environment;
    pub use crate::errors::{Error, Result};
    pub use crate::native::{codes, Native, ANY_SOURCE, ANY_TAG, PROC_NULL, UNDEFINED};
    pub use crate::op::Op;
    pub use crate::request::{test_all, wait_all, Request};
    pub use crate::status::Status;
}
