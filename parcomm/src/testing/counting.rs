//! Call-counting decorator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{intercept_native, Entry};
use crate::native::{Completion, Native, RawComm, RawDatatype, RawOp, RawRequest, ReturnCode, UserFunction};

/// Wraps a native library and counts every call per entry point.
///
/// Clones share the same counters, so a test can keep one clone for
/// assertions and hand another (via [`CountingNative::shared`]) to the code
/// under test.
#[derive(Clone)]
pub struct CountingNative {
    inner: Arc<dyn Native>,
    counts: Arc<Mutex<HashMap<Entry, usize>>>,
}

impl CountingNative {
    /// Count calls made to `inner`.
    pub fn new(inner: impl Native + 'static) -> Self {
        Self::wrap(Arc::new(inner))
    }

    /// Count calls made to an already shared library.
    pub fn wrap(inner: Arc<dyn Native>) -> Self {
        Self {
            inner,
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// This decorator as a shared library handle.
    pub fn shared(&self) -> Arc<dyn Native> {
        Arc::new(self.clone())
    }

    /// How many times `entry` was called.
    pub fn calls(&self, entry: Entry) -> usize {
        self.counts.lock().get(&entry).copied().unwrap_or(0)
    }

    /// Total number of calls across every entry point.
    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    /// Forget every count recorded so far.
    pub fn reset(&self) {
        self.counts.lock().clear();
    }

    fn before(&self, entry: Entry) -> Option<ReturnCode> {
        *self.counts.lock().entry(entry).or_insert(0) += 1;
        None
    }
}

impl fmt::Debug for CountingNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingNative")
            .field("inner", &self.inner)
            .field("total", &self.total())
            .finish()
    }
}

intercept_native!(CountingNative);
