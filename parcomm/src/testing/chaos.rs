//! Failure injection for native calls.
//!
//! ```rust,ignore
//! let chaos = ChaosNative::new(StubNative::new())
//!     .with_policy(FailurePolicy::once(Entry::CommDup, codes::ERR_COMM))
//!     .with_policy(FailurePolicy::random(Entry::Test, codes::ERR_OTHER, 0.1));
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use super::{intercept_native, Entry};
use crate::native::{Completion, Native, RawComm, RawDatatype, RawOp, RawRequest, ReturnCode, UserFunction};

/// When and how one entry point fails.
#[derive(Debug, Clone, PartialEq)]
pub struct FailurePolicy {
    /// Entry point the policy applies to.
    pub entry: Entry,
    /// Status code returned instead of calling the library.
    pub code: ReturnCode,
    /// Probability of failing a matching call (0.0 to 1.0).
    pub probability: f64,
    /// How many more failures to inject; `None` means unlimited.
    pub remaining: Option<usize>,
}

impl FailurePolicy {
    /// Fail every call to `entry`.
    pub const fn always(entry: Entry, code: ReturnCode) -> Self {
        Self {
            entry,
            code,
            probability: 1.0,
            remaining: None,
        }
    }

    /// Fail only the next call to `entry`.
    pub const fn once(entry: Entry, code: ReturnCode) -> Self {
        Self {
            entry,
            code,
            probability: 1.0,
            remaining: Some(1),
        }
    }

    /// Fail calls to `entry` with the given probability.
    pub fn random(entry: Entry, code: ReturnCode, probability: f64) -> Self {
        Self {
            entry,
            code,
            probability: probability.clamp(0.0, 1.0),
            remaining: None,
        }
    }

    fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Wraps a native library and fails calls according to a set of policies.
#[derive(Clone)]
pub struct ChaosNative {
    inner: Arc<dyn Native>,
    policies: Arc<Mutex<Vec<FailurePolicy>>>,
}

impl ChaosNative {
    /// Inject failures into calls made to `inner`.
    pub fn new(inner: impl Native + 'static) -> Self {
        Self::wrap(Arc::new(inner))
    }

    /// Inject failures into an already shared library.
    pub fn wrap(inner: Arc<dyn Native>) -> Self {
        Self {
            inner,
            policies: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a policy.
    #[must_use]
    pub fn with_policy(self, policy: FailurePolicy) -> Self {
        self.add_policy(policy);
        self
    }

    /// Add a policy to a decorator that is already in use.
    pub fn add_policy(&self, policy: FailurePolicy) {
        self.policies.lock().push(policy);
    }

    /// Remove every policy.
    pub fn clear_policies(&self) {
        self.policies.lock().clear();
    }

    /// This decorator as a shared library handle.
    pub fn shared(&self) -> Arc<dyn Native> {
        Arc::new(self.clone())
    }

    fn before(&self, entry: Entry) -> Option<ReturnCode> {
        let mut policies = self.policies.lock();
        let mut rng = rand::rng();
        for policy in policies.iter_mut() {
            if policy.entry != entry || policy.exhausted() {
                continue;
            }
            if policy.probability < 1.0 && !rng.random_bool(policy.probability) {
                continue;
            }
            if let Some(remaining) = policy.remaining.as_mut() {
                *remaining -= 1;
            }
            debug!(?entry, code = policy.code, "chaos: injecting native failure");
            return Some(policy.code);
        }
        None
    }
}

impl fmt::Debug for ChaosNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaosNative")
            .field("inner", &self.inner)
            .field("policies", &self.policies.lock().len())
            .finish()
    }
}

intercept_native!(ChaosNative);
