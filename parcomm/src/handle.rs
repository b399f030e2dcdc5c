//! Move-only ownership of native resource handles.
//!
//! The native library has no reference counting for communicators,
//! datatypes or reduction operators: a handle must be released exactly once,
//! by whoever created it, and never at all if it is one of the library's
//! predefined constants. [`OwnedHandle`] pairs a raw handle with an
//! ownership flag and enforces that rule:
//!
//! - it does not implement `Clone`, so two owners cannot exist;
//! - moving it moves the obligation to release;
//! - [`OwnedHandle::take`] moves the handle out of a place and leaves a null,
//!   unowned handle behind, whose drop does nothing;
//! - dropping an owned handle calls the kind's release entry point.
//!
//! The per-kind part is a [`HandleKind`]: the raw handle type, its null
//! sentinel and the native release function.

use std::fmt;
use std::sync::Arc;

use crate::errors::{check, escalate, Result};
use crate::native::{Native, ReturnCode};

/// One kind of releasable native resource.
pub trait HandleKind: 'static {
    /// Raw native handle type.
    type Raw: Copy + Eq + fmt::Debug;

    /// The null sentinel of the kind.
    const NULL: Self::Raw;

    /// Human readable name, used in logs.
    const LABEL: &'static str;

    /// Invoke the native release entry point, resetting `raw` to null.
    fn release(native: &dyn Native, raw: &mut Self::Raw) -> ReturnCode;
}

/// A raw handle together with the responsibility (or not) to release it.
pub struct OwnedHandle<K: HandleKind> {
    raw: K::Raw,
    owned: bool,
    native: Arc<dyn Native>,
}

impl<K: HandleKind> OwnedHandle<K> {
    /// Wrap a library constant. It is never released.
    pub fn predefined(native: Arc<dyn Native>, raw: K::Raw) -> Self {
        Self {
            raw,
            owned: false,
            native,
        }
    }

    /// An inert handle holding the null sentinel.
    pub fn null(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, K::NULL)
    }

    /// Take ownership of a handle returned by a creation call.
    ///
    /// A null handle is never owned, so a creation call that legitimately
    /// yields no resource produces an inert value.
    pub fn adopt(native: Arc<dyn Native>, raw: K::Raw) -> Self {
        Self {
            raw,
            owned: raw != K::NULL,
            native,
        }
    }

    /// Invoke a native creation call and own what it produced.
    pub fn create<F>(native: Arc<dyn Native>, call: F) -> Result<Self>
    where
        F: FnOnce(&dyn Native, &mut K::Raw) -> ReturnCode,
    {
        let mut raw = K::NULL;
        let code = call(native.as_ref(), &mut raw);
        check(native.as_ref(), code)?;
        tracing::debug!(kind = K::LABEL, handle = ?raw, "created native handle");
        Ok(Self::adopt(native, raw))
    }

    /// The raw handle, for passing into native calls.
    pub const fn raw(&self) -> K::Raw {
        self.raw
    }

    /// Whether this value is responsible for releasing the handle.
    pub const fn is_owned(&self) -> bool {
        self.owned
    }

    /// Whether the handle is the null sentinel.
    pub fn is_null(&self) -> bool {
        self.raw == K::NULL
    }

    /// The library this handle belongs to.
    pub fn native(&self) -> &Arc<dyn Native> {
        &self.native
    }

    /// Invoke a native call that may rewrite the handle in place (commit-style calls).
    pub(crate) fn update<F>(&mut self, call: F) -> Result<()>
    where
        F: FnOnce(&dyn Native, &mut K::Raw) -> ReturnCode,
    {
        let code = call(self.native.as_ref(), &mut self.raw);
        if self.raw == K::NULL {
            self.owned = false;
        }
        check(self.native.as_ref(), code)
    }

    /// Move the handle out, leaving a null unowned handle in its place.
    #[must_use]
    pub fn take(&mut self) -> Self {
        let taken = Self {
            raw: self.raw,
            owned: self.owned,
            native: Arc::clone(&self.native),
        };
        self.raw = K::NULL;
        self.owned = false;
        taken
    }

    /// Release the handle now, reporting a failure instead of aborting.
    ///
    /// Unowned handles are dropped without any native call.
    pub fn release(mut self) -> Result<()> {
        self.release_in_place()
    }

    fn release_in_place(&mut self) -> Result<()> {
        if !self.owned {
            return Ok(());
        }
        self.owned = false;
        let before = self.raw;
        let code = K::release(self.native.as_ref(), &mut self.raw);
        self.raw = K::NULL;
        check(self.native.as_ref(), code)?;
        tracing::debug!(kind = K::LABEL, handle = ?before, "released native handle");
        Ok(())
    }
}

impl<K: HandleKind> Drop for OwnedHandle<K> {
    fn drop(&mut self) {
        if let Err(error) = self.release_in_place() {
            escalate(K::LABEL, &error);
        }
    }
}

impl<K: HandleKind> fmt::Debug for OwnedHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("kind", &K::LABEL)
            .field("raw", &self.raw)
            .field("owned", &self.owned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{codes, RawDatatype};
    use crate::testing::{ChaosNative, CountingNative, Entry, FailurePolicy, StubNative};
    use tracing_test::traced_test;

    struct TypeKind;

    impl HandleKind for TypeKind {
        type Raw = RawDatatype;
        const NULL: RawDatatype = RawDatatype::NULL;
        const LABEL: &'static str = "datatype";

        fn release(native: &dyn Native, raw: &mut RawDatatype) -> ReturnCode {
            native.type_free(raw)
        }
    }

    fn contiguous(native: &Arc<dyn Native>) -> OwnedHandle<TypeKind> {
        OwnedHandle::create(Arc::clone(native), |native, out| {
            native.type_contiguous(4, RawDatatype::INT, out)
        })
        .unwrap()
    }

    #[test]
    fn predefined_handles_are_never_released() {
        let counting = CountingNative::new(StubNative::new());
        let native: Arc<dyn Native> = Arc::new(counting.clone());

        let handle = OwnedHandle::<TypeKind>::predefined(Arc::clone(&native), RawDatatype::DOUBLE);
        assert!(!handle.is_owned());
        drop(handle);

        assert_eq!(counting.calls(Entry::TypeFree), 0);
    }

    #[test]
    fn adopting_null_does_not_take_ownership() {
        let native: Arc<dyn Native> = Arc::new(StubNative::new());
        let handle = OwnedHandle::<TypeKind>::adopt(native, RawDatatype::NULL);
        assert!(handle.is_null());
        assert!(!handle.is_owned());
    }

    #[test]
    fn take_leaves_an_inert_source() {
        let counting = CountingNative::new(StubNative::new());
        let native: Arc<dyn Native> = Arc::new(counting.clone());

        let mut source = contiguous(&native);
        let target = source.take();

        assert!(source.is_null());
        assert!(!source.is_owned());
        assert!(target.is_owned());

        drop(source);
        assert_eq!(counting.calls(Entry::TypeFree), 0);
        drop(target);
        assert_eq!(counting.calls(Entry::TypeFree), 1);
    }

    #[test]
    fn explicit_release_reports_failures() {
        let chaos = ChaosNative::new(StubNative::new());
        let native = chaos.shared();
        let handle = contiguous(&native);

        chaos.add_policy(FailurePolicy::once(Entry::TypeFree, codes::ERR_TYPE));
        let error = handle.release().unwrap_err();

        assert_eq!(error.code(), Some(codes::ERR_TYPE));
    }

    #[test]
    #[traced_test]
    fn create_and_release_are_logged() {
        let native: Arc<dyn Native> = Arc::new(StubNative::new());
        let handle = contiguous(&native);
        handle.release().unwrap();

        assert!(logs_contain("created native handle"));
        assert!(logs_contain("released native handle"));
    }
}
