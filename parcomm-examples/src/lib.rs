//! Example jobs written against `parcomm`
//!
//! Every job is a plain function of a participant's [`Environment`] or
//! communicator, so it runs unchanged on any [`Native`] implementation. The
//! `job` example runs all of them on the in-process substrate from
//! `parcomm-local`.
//!
//! [`Environment`]: parcomm::Environment
//! [`Native`]: parcomm::Native

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Counting participants and assembling per-participant records at a root.
pub mod census;

/// Text that only the root knows, delivered to everyone.
pub mod greeting;

/// Point-to-point traffic around a ring of participants.
pub mod ring;

/// Heat diffusion along a periodic rod split across participants.
pub mod stencil;
