//! Reduction operators.

use std::sync::Arc;

use crate::datatype::Equivalence;
use crate::errors::Result;
use crate::handle::{HandleKind, OwnedHandle};
use crate::native::{Native, RawDatatype, RawOp, ReturnCode, UserFunction};

/// Reduction operator handle kind.
#[derive(Debug)]
pub struct OpKind;

impl HandleKind for OpKind {
    type Raw = RawOp;
    const NULL: RawOp = RawOp::NULL;
    const LABEL: &'static str = "reduction operator";

    fn release(native: &dyn Native, raw: &mut RawOp) -> ReturnCode {
        native.op_free(raw)
    }
}

/// A predefined or user-defined reduction operator.
///
/// Every participant of a collective reduction must pass an equivalent
/// operator; user operators are assumed associative, and commutative unless
/// created with `commute = false`.
#[derive(Debug)]
pub struct Op {
    handle: OwnedHandle<OpKind>,
}

impl Op {
    /// Wrap a predefined operator; it is never freed.
    pub fn predefined(native: Arc<dyn Native>, raw: RawOp) -> Self {
        Self {
            handle: OwnedHandle::predefined(native, raw),
        }
    }

    /// An inert operator holding the null handle.
    pub fn null(native: Arc<dyn Native>) -> Self {
        Self {
            handle: OwnedHandle::null(native),
        }
    }

    /// Sum.
    pub fn sum(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawOp::SUM)
    }

    /// Product.
    pub fn prod(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawOp::PROD)
    }

    /// Minimum.
    pub fn min(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawOp::MIN)
    }

    /// Maximum.
    pub fn max(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawOp::MAX)
    }

    /// Bitwise or.
    pub fn bor(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawOp::BOR)
    }

    /// Bitwise and.
    pub fn band(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawOp::BAND)
    }

    /// Logical or.
    pub fn lor(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawOp::LOR)
    }

    /// Logical and.
    pub fn land(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawOp::LAND)
    }

    /// Register a raw user reduction function.
    pub fn create(native: Arc<dyn Native>, function: UserFunction, commute: bool) -> Result<Self> {
        let handle = OwnedHandle::create(native, |native, out| native.op_create(function, commute, out))?;
        Ok(Self { handle })
    }

    /// Register a typed reduction: `combine(earlier, later)` folds two values.
    pub fn from_fn<T, F>(native: Arc<dyn Native>, combine: F, commute: bool) -> Result<Self>
    where
        T: Equivalence,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        Self::create(native, typed_function(combine), commute)
    }

    /// The raw handle.
    pub const fn raw(&self) -> RawOp {
        self.handle.raw()
    }

    /// Whether this value frees the operator when dropped.
    pub const fn is_owned(&self) -> bool {
        self.handle.is_owned()
    }

    /// Whether this is the null operator.
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    /// Move the operator out, leaving a null one behind.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            handle: self.handle.take(),
        }
    }

    /// Free the operator now, reporting a failure instead of aborting.
    pub fn release(self) -> Result<()> {
        self.handle.release()
    }

    /// The library this operator belongs to.
    pub fn native(&self) -> &Arc<dyn Native> {
        self.handle.native()
    }
}

/// Lift a typed fold into the byte-level callback the library invokes.
///
/// The callback computes `inout[i] = combine(input[i], inout[i])` for the
/// first `len` elements.
fn typed_function<T, F>(combine: F) -> UserFunction
where
    T: Equivalence,
    F: Fn(T, T) -> T + Send + Sync + 'static,
{
    Arc::new(move |input: &[u8], inout: &mut [u8], len: i32, _datatype: RawDatatype| {
        let pairs = input
            .chunks_exact(T::SIZE)
            .zip(inout.chunks_exact_mut(T::SIZE))
            .take(usize::try_from(len).unwrap_or(0));
        let mut scratch = Vec::with_capacity(T::SIZE);
        for (earlier, later) in pairs {
            scratch.clear();
            combine(T::decode(earlier), T::decode(later)).encode(&mut scratch);
            later.copy_from_slice(&scratch);
        }
    })
}
