//! Process-wide bring-up and tear-down of the native runtime.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::comm::Communicator;
use crate::errors::{check, escalate, Result};
use crate::native::Native;

/// Scope guard for the native runtime.
///
/// Creating one initializes the runtime unless something else already did;
/// dropping it finalizes the runtime unless something else already did.
/// Both checks go through the library's own `initialized`/`finalized`
/// queries, so nesting guards or mixing them with manual bring-up is safe.
///
/// The guard is tied to the participant that created it and is neither
/// `Clone` nor `Send`.
pub struct Environment {
    native: Arc<dyn Native>,
    _not_send: PhantomData<*const ()>,
}

impl Environment {
    /// Bring up the runtime without process arguments.
    pub fn new(native: Arc<dyn Native>) -> Result<Self> {
        Self::with_args(native, &mut Vec::new())
    }

    /// Bring up the runtime, letting the library consume the arguments it
    /// recognizes from `args`.
    pub fn with_args(native: Arc<dyn Native>, args: &mut Vec<String>) -> Result<Self> {
        let mut initialized = false;
        check(native.as_ref(), native.initialized(&mut initialized))?;
        if initialized {
            debug!("native runtime already initialized");
        } else {
            check(native.as_ref(), native.init(args))?;
            debug!(args = args.len(), "initialized native runtime");
        }
        Ok(Self {
            native,
            _not_send: PhantomData,
        })
    }

    /// The world communicator.
    pub fn world(&self) -> Communicator {
        Communicator::world(Arc::clone(&self.native))
    }

    /// The communicator containing only this participant.
    pub fn solo(&self) -> Communicator {
        Communicator::solo(Arc::clone(&self.native))
    }

    /// The library this guard manages.
    pub fn native(&self) -> &Arc<dyn Native> {
        &self.native
    }

    fn finalize(&self) -> Result<()> {
        let mut finalized = false;
        check(self.native.as_ref(), self.native.finalized(&mut finalized))?;
        if !finalized {
            check(self.native.as_ref(), self.native.finalize())?;
            debug!("finalized native runtime");
        }
        Ok(())
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(error) = self.finalize() {
            escalate("environment", &error);
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment").field("native", &self.native).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::codes;
    use crate::testing::{ChaosNative, CountingNative, Entry, FailurePolicy, StubNative};

    #[test]
    fn init_and_finalize_happen_once_across_nested_guards() {
        let counting = CountingNative::new(StubNative::new());

        let outer = Environment::new(counting.shared()).unwrap();
        let inner = Environment::new(counting.shared()).unwrap();
        assert_eq!(counting.calls(Entry::Init), 1);
        assert_eq!(counting.calls(Entry::Initialized), 2);

        drop(inner);
        drop(outer);
        assert_eq!(counting.calls(Entry::Finalize), 1);
        assert_eq!(counting.calls(Entry::Finalized), 2);
    }

    #[test]
    fn guard_hands_out_predefined_communicators() {
        let env = Environment::with_args(StubNative::new().shared(), &mut vec!["job".to_owned()]).unwrap();

        let world = env.world();
        assert!(!world.is_owned());
        assert_eq!(world.size().unwrap(), 1);
        assert_eq!(env.solo().rank().unwrap(), 0);
    }

    #[test]
    fn init_failure_is_reported() {
        let chaos = ChaosNative::new(StubNative::new()).with_policy(FailurePolicy::always(Entry::Init, codes::ERR_OTHER));

        let error = Environment::new(chaos.shared()).unwrap_err();
        assert_eq!(error.code(), Some(codes::ERR_OTHER));
    }
}
