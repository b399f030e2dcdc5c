//! Datatypes: the predefined-type dispatch table and owned datatype handles.
//!
//! [`Equivalence`] maps a Rust scalar type to the library's datatype tag and
//! knows how to move values of that type across the byte-oriented native
//! boundary. [`Datatype`] is the owned handle: predefined tags are wrapped
//! unowned, derived types built with [`Datatype::contiguous`] are owned and
//! freed exactly once.

use std::sync::Arc;

use crate::errors::{check, Error, Result};
use crate::handle::{HandleKind, OwnedHandle};
use crate::native::{Native, RawDatatype, ReturnCode};

/// A scalar type with a predefined native datatype.
pub trait Equivalence: Copy + Send + Sync + 'static {
    /// The predefined native tag for this type.
    const DATATYPE: RawDatatype;

    /// Size in bytes of one value on the wire.
    const SIZE: usize;

    /// Append the wire representation of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Read a value from exactly [`Self::SIZE`] bytes.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! equivalence {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Equivalence for $ty {
                const DATATYPE: RawDatatype = RawDatatype::$tag;
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    Self::from_ne_bytes(raw)
                }
            }
        )*
    };
}

equivalence! {
    u8 => BYTE,
    i8 => CHAR,
    u16 => UNSIGNED_SHORT,
    u32 => UNSIGNED,
    usize => UNSIGNED_LONG,
    u64 => UNSIGNED_LONG_LONG,
    i16 => SHORT,
    i32 => INT,
    i64 => LONG_LONG_INT,
    f32 => FLOAT,
    f64 => DOUBLE,
}

impl Equivalence for bool {
    const DATATYPE: RawDatatype = RawDatatype::C_BOOL;
    const SIZE: usize = 1;

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// The predefined native tag of `T`.
pub const fn datatype_of<T: Equivalence>() -> RawDatatype {
    T::DATATYPE
}

/// Wire representation of a slice of values.
pub(crate) fn encode_slice<T: Equivalence>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::SIZE);
    for value in values {
        value.encode(&mut out);
    }
    out
}

/// Overwrite a prefix of `target` with the values in `bytes`.
///
/// Returns the number of values written; trailing elements of `target` that
/// `bytes` does not cover are left untouched.
pub(crate) fn decode_into<T: Equivalence>(bytes: &[u8], target: &mut [T]) -> usize {
    let mut written = 0;
    for (slot, chunk) in target.iter_mut().zip(bytes.chunks_exact(T::SIZE)) {
        *slot = T::decode(chunk);
        written += 1;
    }
    written
}

/// Element count of a buffer as the native `int` count.
pub(crate) fn count_of(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::misuse(format!("buffer of {len} elements exceeds the native count range")))
}

/// Datatype handle kind.
#[derive(Debug)]
pub struct DatatypeKind;

impl HandleKind for DatatypeKind {
    type Raw = RawDatatype;
    const NULL: RawDatatype = RawDatatype::NULL;
    const LABEL: &'static str = "datatype";

    fn release(native: &dyn Native, raw: &mut RawDatatype) -> ReturnCode {
        native.type_free(raw)
    }
}

/// An owned or predefined native datatype.
#[derive(Debug)]
pub struct Datatype {
    handle: OwnedHandle<DatatypeKind>,
}

impl Datatype {
    /// Wrap a predefined tag; it is never freed.
    pub fn predefined(native: Arc<dyn Native>, raw: RawDatatype) -> Self {
        Self {
            handle: OwnedHandle::predefined(native, raw),
        }
    }

    /// The predefined datatype of `T`.
    pub fn of<T: Equivalence>(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, T::DATATYPE)
    }

    /// An inert datatype holding the null handle.
    pub fn null(native: Arc<dyn Native>) -> Self {
        Self {
            handle: OwnedHandle::null(native),
        }
    }

    /// Uninterpreted bytes.
    pub fn byte(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::BYTE)
    }

    /// Signed char.
    pub fn char(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::CHAR)
    }

    /// Unsigned int.
    pub fn unsigned(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::UNSIGNED)
    }

    /// Unsigned long.
    pub fn unsigned_long(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::UNSIGNED_LONG)
    }

    /// Unsigned long long.
    pub fn unsigned_long_long(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::UNSIGNED_LONG_LONG)
    }

    /// Signed int.
    pub fn int(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::INT)
    }

    /// Signed long long.
    pub fn long_long_int(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::LONG_LONG_INT)
    }

    /// Single precision float.
    pub fn float(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::FLOAT)
    }

    /// Double precision float.
    pub fn double(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::DOUBLE)
    }

    /// C boolean.
    pub fn bool(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::C_BOOL)
    }

    /// Packed bytes.
    pub fn packed(native: Arc<dyn Native>) -> Self {
        Self::predefined(native, RawDatatype::PACKED)
    }

    /// A committed datatype of `count` consecutive `old` elements.
    pub fn contiguous(count: i32, old: &Self) -> Result<Self> {
        let native = Arc::clone(old.handle.native());
        let mut handle = OwnedHandle::<DatatypeKind>::create(native, |native, out| {
            native.type_contiguous(count, old.raw(), out)
        })?;
        handle.update(|native, raw| native.type_commit(raw))?;
        Ok(Self { handle })
    }

    /// Size in bytes of one element of this datatype.
    pub fn size(&self) -> Result<i32> {
        let mut size = 0;
        let code = self.handle.native().type_size(self.raw(), &mut size);
        check(self.handle.native().as_ref(), code)?;
        Ok(size)
    }

    /// The raw handle.
    pub const fn raw(&self) -> RawDatatype {
        self.handle.raw()
    }

    /// Whether this value frees the datatype when dropped.
    pub const fn is_owned(&self) -> bool {
        self.handle.is_owned()
    }

    /// Whether this is the null datatype.
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    /// Move the datatype out, leaving a null one behind.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            handle: self.handle.take(),
        }
    }

    /// Free the datatype now, reporting a failure instead of aborting.
    pub fn release(self) -> Result<()> {
        self.handle.release()
    }

    /// The library this datatype belongs to.
    pub fn native(&self) -> &Arc<dyn Native> {
        self.handle.native()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::codes;
    use crate::testing::{CountingNative, Entry, StubNative};

    #[test]
    fn dispatch_table_matches_native_sizes() {
        assert_eq!(datatype_of::<f64>(), RawDatatype::DOUBLE);
        assert_eq!(datatype_of::<i32>(), RawDatatype::INT);
        assert_eq!(datatype_of::<bool>(), RawDatatype::C_BOOL);
        assert_eq!(RawDatatype::DOUBLE.predefined_size(), Some(<f64 as Equivalence>::SIZE));
        assert_eq!(RawDatatype::LONG_LONG_INT.predefined_size(), Some(<i64 as Equivalence>::SIZE));
        assert_eq!(RawDatatype::C_BOOL.predefined_size(), Some(<bool as Equivalence>::SIZE));
    }

    #[test]
    fn decode_into_writes_only_the_delivered_prefix() {
        let bytes = encode_slice(&[7i32, 8]);
        let mut target = [0i32, 0, 99];

        assert_eq!(decode_into(&bytes, &mut target), 2);
        assert_eq!(target, [7, 8, 99]);
    }

    #[test]
    fn contiguous_types_are_committed_owned_and_freed_once() {
        let counting = CountingNative::new(StubNative::new());
        let native = counting.shared();

        let int = Datatype::int(Arc::clone(&native));
        let quad = Datatype::contiguous(4, &int).unwrap();

        assert!(quad.is_owned());
        assert!(!int.is_owned());
        assert_eq!(quad.size().unwrap(), 16);
        assert_eq!(counting.calls(Entry::TypeCommit), 1);

        drop(quad);
        drop(int);
        assert_eq!(counting.calls(Entry::TypeFree), 1);
    }

    #[test]
    fn contiguous_of_null_type_fails() {
        let native = StubNative::new().shared();
        let null = Datatype::null(native);

        let error = Datatype::contiguous(2, &null).unwrap_err();
        assert_eq!(error.code(), Some(codes::ERR_TYPE));
    }

    #[test]
    fn oversized_buffers_are_rejected_before_any_native_call() {
        assert!(count_of(usize::MAX).unwrap_err().is_misuse());
        assert_eq!(count_of(3).unwrap(), 3);
    }
}
