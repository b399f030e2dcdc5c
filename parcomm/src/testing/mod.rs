//! Testing utilities for parcomm.
//!
//! - [`StubNative`]: a complete single-participant native library, enough to
//!   exercise every handle and request code path without a real runtime.
//! - [`CountingNative`]: decorator that counts calls per entry point, for
//!   asserting exactly how many releases or waits happened.
//! - [`ChaosNative`]: decorator that makes chosen entry points fail.
//! - [`generators`]: proptest strategies for ranks, colors and topologies.
//!
//! ```rust,ignore
//! use parcomm::testing::prelude::*;
//!
//! let counting = CountingNative::new(StubNative::new());
//! let world = Communicator::world(counting.shared());
//! let dup = world.duplicate()?;
//! drop(dup);
//! assert_eq!(counting.calls(Entry::CommFree), 1);
//! ```

/// Prelude module for convenient imports.
pub mod prelude {
    pub use super::generators::*;
    pub use super::{ChaosNative, CountingNative, Entry, FailurePolicy, StubNative};
    pub use crate::prelude::*;
}

/// One native entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entry {
    /// `initialized`
    Initialized,
    /// `init`
    Init,
    /// `finalized`
    Finalized,
    /// `finalize`
    Finalize,
    /// `error_string`
    ErrorString,
    /// `comm_size`
    CommSize,
    /// `comm_rank`
    CommRank,
    /// `comm_dup`
    CommDup,
    /// `comm_split`
    CommSplit,
    /// `comm_split_type`
    CommSplitType,
    /// `comm_free`
    CommFree,
    /// `cart_create`
    CartCreate,
    /// `cartdim_get`
    CartdimGet,
    /// `cart_get`
    CartGet,
    /// `cart_rank`
    CartRank,
    /// `cart_coords`
    CartCoords,
    /// `type_contiguous`
    TypeContiguous,
    /// `type_commit`
    TypeCommit,
    /// `type_size`
    TypeSize,
    /// `type_free`
    TypeFree,
    /// `op_create`
    OpCreate,
    /// `op_free`
    OpFree,
    /// `isend`
    Isend,
    /// `irecv`
    Irecv,
    /// `iallreduce`
    Iallreduce,
    /// `ibarrier`
    Ibarrier,
    /// `ibcast`
    Ibcast,
    /// `igather`
    Igather,
    /// `igatherv`
    Igatherv,
    /// `iscatterv`
    Iscatterv,
    /// `exscan`
    Exscan,
    /// `wait`
    Wait,
    /// `test`
    Test,
    /// `waitall`
    Waitall,
    /// `testall`
    Testall,
}

/// Implements [`Native`](crate::native::Native) for a decorator with an
/// `inner: Arc<dyn Native>` field and a `before(&self, Entry) -> Option<ReturnCode>`
/// hook. A `Some` from the hook short-circuits the call with that code.
macro_rules! intercept_native {
    ($ty:ty) => {
        impl $crate::native::Native for $ty {
            fn initialized(&self, flag: &mut bool) -> ReturnCode {
                if let Some(code) = self.before(Entry::Initialized) {
                    return code;
                }
                self.inner.initialized(flag)
            }

            fn init(&self, args: &mut Vec<String>) -> ReturnCode {
                if let Some(code) = self.before(Entry::Init) {
                    return code;
                }
                self.inner.init(args)
            }

            fn finalized(&self, flag: &mut bool) -> ReturnCode {
                if let Some(code) = self.before(Entry::Finalized) {
                    return code;
                }
                self.inner.finalized(flag)
            }

            fn finalize(&self) -> ReturnCode {
                if let Some(code) = self.before(Entry::Finalize) {
                    return code;
                }
                self.inner.finalize()
            }

            fn error_string(&self, code: ReturnCode, buf: &mut [u8], resultlen: &mut usize) -> ReturnCode {
                if let Some(code) = self.before(Entry::ErrorString) {
                    return code;
                }
                self.inner.error_string(code, buf, resultlen)
            }

            fn comm_size(&self, comm: RawComm, size: &mut i32) -> ReturnCode {
                if let Some(code) = self.before(Entry::CommSize) {
                    return code;
                }
                self.inner.comm_size(comm, size)
            }

            fn comm_rank(&self, comm: RawComm, rank: &mut i32) -> ReturnCode {
                if let Some(code) = self.before(Entry::CommRank) {
                    return code;
                }
                self.inner.comm_rank(comm, rank)
            }

            fn comm_dup(&self, comm: RawComm, newcomm: &mut RawComm) -> ReturnCode {
                if let Some(code) = self.before(Entry::CommDup) {
                    return code;
                }
                self.inner.comm_dup(comm, newcomm)
            }

            fn comm_split(&self, comm: RawComm, color: i32, key: i32, newcomm: &mut RawComm) -> ReturnCode {
                if let Some(code) = self.before(Entry::CommSplit) {
                    return code;
                }
                self.inner.comm_split(comm, color, key, newcomm)
            }

            fn comm_split_type(
                &self,
                comm: RawComm,
                split_type: i32,
                key: i32,
                newcomm: &mut RawComm,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::CommSplitType) {
                    return code;
                }
                self.inner.comm_split_type(comm, split_type, key, newcomm)
            }

            fn comm_free(&self, comm: &mut RawComm) -> ReturnCode {
                if let Some(code) = self.before(Entry::CommFree) {
                    return code;
                }
                self.inner.comm_free(comm)
            }

            fn cart_create(
                &self,
                comm: RawComm,
                dims: &[i32],
                periods: &[bool],
                reorder: bool,
                newcomm: &mut RawComm,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::CartCreate) {
                    return code;
                }
                self.inner.cart_create(comm, dims, periods, reorder, newcomm)
            }

            fn cartdim_get(&self, comm: RawComm, ndims: &mut i32) -> ReturnCode {
                if let Some(code) = self.before(Entry::CartdimGet) {
                    return code;
                }
                self.inner.cartdim_get(comm, ndims)
            }

            fn cart_get(
                &self,
                comm: RawComm,
                dims: &mut [i32],
                periods: &mut [bool],
                coords: &mut [i32],
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::CartGet) {
                    return code;
                }
                self.inner.cart_get(comm, dims, periods, coords)
            }

            fn cart_rank(&self, comm: RawComm, coords: &[i32], rank: &mut i32) -> ReturnCode {
                if let Some(code) = self.before(Entry::CartRank) {
                    return code;
                }
                self.inner.cart_rank(comm, coords, rank)
            }

            fn cart_coords(&self, comm: RawComm, rank: i32, coords: &mut [i32]) -> ReturnCode {
                if let Some(code) = self.before(Entry::CartCoords) {
                    return code;
                }
                self.inner.cart_coords(comm, rank, coords)
            }

            fn type_contiguous(&self, count: i32, oldtype: RawDatatype, newtype: &mut RawDatatype) -> ReturnCode {
                if let Some(code) = self.before(Entry::TypeContiguous) {
                    return code;
                }
                self.inner.type_contiguous(count, oldtype, newtype)
            }

            fn type_commit(&self, datatype: &mut RawDatatype) -> ReturnCode {
                if let Some(code) = self.before(Entry::TypeCommit) {
                    return code;
                }
                self.inner.type_commit(datatype)
            }

            fn type_size(&self, datatype: RawDatatype, size: &mut i32) -> ReturnCode {
                if let Some(code) = self.before(Entry::TypeSize) {
                    return code;
                }
                self.inner.type_size(datatype, size)
            }

            fn type_free(&self, datatype: &mut RawDatatype) -> ReturnCode {
                if let Some(code) = self.before(Entry::TypeFree) {
                    return code;
                }
                self.inner.type_free(datatype)
            }

            fn op_create(&self, function: UserFunction, commute: bool, op: &mut RawOp) -> ReturnCode {
                if let Some(code) = self.before(Entry::OpCreate) {
                    return code;
                }
                self.inner.op_create(function, commute, op)
            }

            fn op_free(&self, op: &mut RawOp) -> ReturnCode {
                if let Some(code) = self.before(Entry::OpFree) {
                    return code;
                }
                self.inner.op_free(op)
            }

            fn isend(
                &self,
                buf: &[u8],
                count: i32,
                datatype: RawDatatype,
                dest: i32,
                tag: i32,
                comm: RawComm,
                request: &mut RawRequest,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Isend) {
                    return code;
                }
                self.inner.isend(buf, count, datatype, dest, tag, comm, request)
            }

            fn irecv(
                &self,
                count: i32,
                datatype: RawDatatype,
                source: i32,
                tag: i32,
                comm: RawComm,
                request: &mut RawRequest,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Irecv) {
                    return code;
                }
                self.inner.irecv(count, datatype, source, tag, comm, request)
            }

            fn iallreduce(
                &self,
                sendbuf: &[u8],
                count: i32,
                datatype: RawDatatype,
                op: RawOp,
                comm: RawComm,
                request: &mut RawRequest,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Iallreduce) {
                    return code;
                }
                self.inner.iallreduce(sendbuf, count, datatype, op, comm, request)
            }

            fn ibarrier(&self, comm: RawComm, request: &mut RawRequest) -> ReturnCode {
                if let Some(code) = self.before(Entry::Ibarrier) {
                    return code;
                }
                self.inner.ibarrier(comm, request)
            }

            fn ibcast(
                &self,
                buf: &[u8],
                count: i32,
                datatype: RawDatatype,
                root: i32,
                comm: RawComm,
                request: &mut RawRequest,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Ibcast) {
                    return code;
                }
                self.inner.ibcast(buf, count, datatype, root, comm, request)
            }

            fn igather(
                &self,
                sendbuf: &[u8],
                sendcount: i32,
                datatype: RawDatatype,
                recvcount: i32,
                root: i32,
                comm: RawComm,
                request: &mut RawRequest,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Igather) {
                    return code;
                }
                self.inner.igather(sendbuf, sendcount, datatype, recvcount, root, comm, request)
            }

            fn igatherv(
                &self,
                sendbuf: &[u8],
                sendcount: i32,
                datatype: RawDatatype,
                recvbuf: &[u8],
                recvcounts: &[i32],
                displs: &[i32],
                root: i32,
                comm: RawComm,
                request: &mut RawRequest,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Igatherv) {
                    return code;
                }
                self.inner.igatherv(
                    sendbuf, sendcount, datatype, recvbuf, recvcounts, displs, root, comm, request,
                )
            }

            fn iscatterv(
                &self,
                sendbuf: &[u8],
                sendcounts: &[i32],
                displs: &[i32],
                datatype: RawDatatype,
                recvcount: i32,
                root: i32,
                comm: RawComm,
                request: &mut RawRequest,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Iscatterv) {
                    return code;
                }
                self.inner.iscatterv(
                    sendbuf, sendcounts, displs, datatype, recvcount, root, comm, request,
                )
            }

            fn exscan(
                &self,
                sendbuf: &[u8],
                recvbuf: &mut [u8],
                count: i32,
                datatype: RawDatatype,
                op: RawOp,
                comm: RawComm,
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Exscan) {
                    return code;
                }
                self.inner.exscan(sendbuf, recvbuf, count, datatype, op, comm)
            }

            fn wait(&self, request: &mut RawRequest, completion: &mut Completion) -> ReturnCode {
                if let Some(code) = self.before(Entry::Wait) {
                    return code;
                }
                self.inner.wait(request, completion)
            }

            fn test(&self, request: &mut RawRequest, flag: &mut bool, completion: &mut Completion) -> ReturnCode {
                if let Some(code) = self.before(Entry::Test) {
                    return code;
                }
                self.inner.test(request, flag, completion)
            }

            fn waitall(&self, requests: &mut [RawRequest], completions: &mut [Completion]) -> ReturnCode {
                if let Some(code) = self.before(Entry::Waitall) {
                    return code;
                }
                self.inner.waitall(requests, completions)
            }

            fn testall(
                &self,
                requests: &mut [RawRequest],
                flag: &mut bool,
                completions: &mut [Completion],
            ) -> ReturnCode {
                if let Some(code) = self.before(Entry::Testall) {
                    return code;
                }
                self.inner.testall(requests, flag, completions)
            }
        }
    };
}

pub(crate) use intercept_native;

mod chaos;
mod counting;
pub mod generators;
mod stub;

pub use chaos::{ChaosNative, FailurePolicy};
pub use counting::CountingNative;
pub use stub::StubNative;
