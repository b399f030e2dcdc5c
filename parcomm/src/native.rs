//! The native call boundary.
//!
//! Everything in this crate eventually calls one entry point of a [`Native`]
//! implementation. The trait is deliberately shaped like a C library surface:
//! entry points take marshaled scalars, opaque handles and byte buffers, write
//! their results into `&mut` output slots and return an integer status code.
//! Nothing above this module interprets a handle value; handles are only
//! compared against their `NULL` sentinel and passed back in.
//!
//! Buffers cross the boundary as bytes. Input buffers are copied by the
//! library when a call is issued. Output buffers of non-blocking calls are
//! handed back in [`Completion::data`] once the request completes, and the
//! owning [`Request`](crate::request::Request) writes them into the caller's
//! memory.

use std::fmt;
use std::sync::Arc;

/// Integer status code returned by every native entry point.
pub type ReturnCode = i32;

/// Maximum length of an error string produced by [`Native::error_string`].
pub const MAX_ERROR_STRING: usize = 512;

/// Wildcard source rank for receives.
pub const ANY_SOURCE: i32 = -1;

/// Wildcard tag for receives.
pub const ANY_TAG: i32 = -1;

/// Color passed to a split to opt out of every resulting group.
pub const UNDEFINED: i32 = -32766;

/// Rank returned for processes that are not part of a group.
pub const PROC_NULL: i32 = -2;

/// Status codes understood by the error channel.
pub mod codes {
    use super::ReturnCode;

    /// Successful completion.
    pub const SUCCESS: ReturnCode = 0;
    /// Invalid buffer.
    pub const ERR_BUFFER: ReturnCode = 1;
    /// Invalid count argument.
    pub const ERR_COUNT: ReturnCode = 2;
    /// Invalid datatype.
    pub const ERR_TYPE: ReturnCode = 3;
    /// Invalid tag.
    pub const ERR_TAG: ReturnCode = 4;
    /// Invalid communicator.
    pub const ERR_COMM: ReturnCode = 5;
    /// Invalid rank.
    pub const ERR_RANK: ReturnCode = 6;
    /// Invalid root.
    pub const ERR_ROOT: ReturnCode = 7;
    /// Invalid group.
    pub const ERR_GROUP: ReturnCode = 8;
    /// Invalid reduction operator.
    pub const ERR_OP: ReturnCode = 9;
    /// Invalid topology.
    pub const ERR_TOPOLOGY: ReturnCode = 10;
    /// Invalid dimension argument.
    pub const ERR_DIMS: ReturnCode = 11;
    /// Invalid argument of some other kind.
    pub const ERR_ARG: ReturnCode = 12;
    /// Unknown error.
    pub const ERR_UNKNOWN: ReturnCode = 13;
    /// Message truncated on receive.
    pub const ERR_TRUNCATE: ReturnCode = 14;
    /// Known error not in this list.
    pub const ERR_OTHER: ReturnCode = 15;
    /// Internal library error.
    pub const ERR_INTERN: ReturnCode = 16;
    /// Error code is in the per-request status.
    pub const ERR_IN_STATUS: ReturnCode = 17;
    /// Pending request.
    pub const ERR_PENDING: ReturnCode = 18;
    /// Invalid request handle.
    pub const ERR_REQUEST: ReturnCode = 19;

    /// Conventional description of a standard code.
    pub const fn description(code: ReturnCode) -> Option<&'static str> {
        Some(match code {
            SUCCESS => "no errors",
            ERR_BUFFER => "invalid buffer pointer",
            ERR_COUNT => "invalid count argument",
            ERR_TYPE => "invalid datatype",
            ERR_TAG => "invalid tag",
            ERR_COMM => "invalid communicator",
            ERR_RANK => "invalid rank",
            ERR_ROOT => "invalid root",
            ERR_GROUP => "invalid group",
            ERR_OP => "invalid reduce operation",
            ERR_TOPOLOGY => "invalid topology",
            ERR_DIMS => "invalid dimension argument",
            ERR_ARG => "invalid argument of some other kind",
            ERR_UNKNOWN => "unknown error",
            ERR_TRUNCATE => "message truncated",
            ERR_OTHER => "known error not in this list",
            ERR_INTERN => "internal error",
            ERR_IN_STATUS => "error code is in status",
            ERR_PENDING => "pending request",
            ERR_REQUEST => "invalid request",
            _ => return None,
        })
    }
}

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $constant:ident = $value:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// The null sentinel for this handle kind.
            pub const NULL: Self = Self(0);
            $(
                $(#[$cmeta])*
                pub const $constant: Self = Self($value);
            )*

            /// Whether this is the null sentinel.
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_null() {
                    write!(f, "{}(NULL)", stringify!($name))
                } else {
                    write!(f, "{}({:#x})", stringify!($name), self.0)
                }
            }
        }
    };
}

raw_handle! {
    /// Native communicator handle.
    RawComm {
        /// Every participant of the job.
        WORLD = 1,
        /// Only the calling participant.
        SELF = 2,
    }
}

raw_handle! {
    /// Native datatype handle.
    RawDatatype {
        /// Uninterpreted byte.
        BYTE = 1,
        /// Signed char.
        CHAR = 2,
        /// Unsigned short.
        UNSIGNED_SHORT = 3,
        /// Unsigned int.
        UNSIGNED = 4,
        /// Unsigned long.
        UNSIGNED_LONG = 5,
        /// Unsigned long long.
        UNSIGNED_LONG_LONG = 6,
        /// Signed short.
        SHORT = 7,
        /// Signed int.
        INT = 8,
        /// Signed long long.
        LONG_LONG_INT = 9,
        /// Single precision float.
        FLOAT = 10,
        /// Double precision float.
        DOUBLE = 11,
        /// C boolean.
        C_BOOL = 12,
        /// Packed bytes.
        PACKED = 13,
    }
}

impl RawDatatype {
    /// Size in bytes of a predefined datatype; `None` for derived or null ones.
    pub const fn predefined_size(self) -> Option<usize> {
        Some(match self {
            Self::BYTE | Self::CHAR | Self::C_BOOL | Self::PACKED => 1,
            Self::UNSIGNED_SHORT | Self::SHORT => 2,
            Self::UNSIGNED | Self::INT | Self::FLOAT => 4,
            Self::UNSIGNED_LONG | Self::UNSIGNED_LONG_LONG | Self::LONG_LONG_INT | Self::DOUBLE => 8,
            _ => return None,
        })
    }
}

raw_handle! {
    /// Native reduction operator handle.
    RawOp {
        /// Sum.
        SUM = 1,
        /// Product.
        PROD = 2,
        /// Minimum.
        MIN = 3,
        /// Maximum.
        MAX = 4,
        /// Bitwise or.
        BOR = 5,
        /// Bitwise and.
        BAND = 6,
        /// Logical or.
        LOR = 7,
        /// Logical and.
        LAND = 8,
    }
}

raw_handle! {
    /// Native in-flight operation handle.
    RawRequest {}
}

/// Native completion record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStatus {
    /// Rank of the sender (receives) or of the caller (everything else).
    pub source: i32,
    /// Tag of the matched message.
    pub tag: i32,
    /// Per-operation status code.
    pub error: ReturnCode,
}

impl Default for RawStatus {
    fn default() -> Self {
        Self {
            source: ANY_SOURCE,
            tag: ANY_TAG,
            error: codes::SUCCESS,
        }
    }
}

/// Output slot filled by [`Native::wait`], [`Native::test`] and [`Native::waitall`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Completion record of the operation.
    pub status: RawStatus,
    /// Bytes the operation produced for the caller's output buffer, if any.
    pub data: Option<Vec<u8>>,
}

/// User reduction function: combines `input` into `inout` element-wise for
/// `len` elements of `datatype`, computing `inout = input op inout`.
pub type UserFunction = Arc<dyn Fn(&[u8], &mut [u8], i32, RawDatatype) + Send + Sync>;

/// Split classes understood by [`Native::comm_split_type`].
pub mod split_type {
    /// Group participants that share memory (the same node).
    pub const SHARED: i32 = 1;
}

/// The native parallel-communication library.
///
/// One value of this trait represents the library as seen by one
/// participant. Implementations must be internally synchronized; the
/// handle layer never locks.
pub trait Native: Send + Sync + fmt::Debug {
    /// Whether the runtime has been initialized.
    fn initialized(&self, flag: &mut bool) -> ReturnCode;
    /// Initialize the runtime with the process arguments.
    fn init(&self, args: &mut Vec<String>) -> ReturnCode;
    /// Whether the runtime has been finalized.
    fn finalized(&self, flag: &mut bool) -> ReturnCode;
    /// Tear down the runtime.
    fn finalize(&self) -> ReturnCode;
    /// Describe `code` into `buf`, writing the text length to `resultlen`.
    fn error_string(&self, code: ReturnCode, buf: &mut [u8], resultlen: &mut usize) -> ReturnCode;

    /// Number of participants in `comm`.
    fn comm_size(&self, comm: RawComm, size: &mut i32) -> ReturnCode;
    /// Rank of the caller in `comm`.
    fn comm_rank(&self, comm: RawComm, rank: &mut i32) -> ReturnCode;
    /// Duplicate `comm` (collective).
    fn comm_dup(&self, comm: RawComm, newcomm: &mut RawComm) -> ReturnCode;
    /// Partition `comm` by color, ordering each part by key (collective).
    fn comm_split(&self, comm: RawComm, color: i32, key: i32, newcomm: &mut RawComm) -> ReturnCode;
    /// Partition `comm` by a locality class (collective).
    fn comm_split_type(
        &self,
        comm: RawComm,
        split_type: i32,
        key: i32,
        newcomm: &mut RawComm,
    ) -> ReturnCode;
    /// Release a communicator and reset the handle to null.
    fn comm_free(&self, comm: &mut RawComm) -> ReturnCode;

    /// Attach a Cartesian topology to a new communicator (collective).
    fn cart_create(
        &self,
        comm: RawComm,
        dims: &[i32],
        periods: &[bool],
        reorder: bool,
        newcomm: &mut RawComm,
    ) -> ReturnCode;
    /// Number of Cartesian dimensions of `comm`.
    fn cartdim_get(&self, comm: RawComm, ndims: &mut i32) -> ReturnCode;
    /// Dimensions, periodicity and caller coordinates of `comm`.
    fn cart_get(
        &self,
        comm: RawComm,
        dims: &mut [i32],
        periods: &mut [bool],
        coords: &mut [i32],
    ) -> ReturnCode;
    /// Rank at Cartesian coordinates.
    fn cart_rank(&self, comm: RawComm, coords: &[i32], rank: &mut i32) -> ReturnCode;
    /// Cartesian coordinates of a rank.
    fn cart_coords(&self, comm: RawComm, rank: i32, coords: &mut [i32]) -> ReturnCode;

    /// Build a datatype of `count` consecutive `oldtype` elements.
    fn type_contiguous(&self, count: i32, oldtype: RawDatatype, newtype: &mut RawDatatype) -> ReturnCode;
    /// Commit a derived datatype for use in communication.
    fn type_commit(&self, datatype: &mut RawDatatype) -> ReturnCode;
    /// Size in bytes of one element of `datatype`.
    fn type_size(&self, datatype: RawDatatype, size: &mut i32) -> ReturnCode;
    /// Release a derived datatype and reset the handle to null.
    fn type_free(&self, datatype: &mut RawDatatype) -> ReturnCode;

    /// Register a user reduction function.
    fn op_create(&self, function: UserFunction, commute: bool, op: &mut RawOp) -> ReturnCode;
    /// Release a user reduction operator and reset the handle to null.
    fn op_free(&self, op: &mut RawOp) -> ReturnCode;

    /// Start a send of `count` elements.
    fn isend(
        &self,
        buf: &[u8],
        count: i32,
        datatype: RawDatatype,
        dest: i32,
        tag: i32,
        comm: RawComm,
        request: &mut RawRequest,
    ) -> ReturnCode;
    /// Start a receive of up to `count` elements.
    fn irecv(
        &self,
        count: i32,
        datatype: RawDatatype,
        source: i32,
        tag: i32,
        comm: RawComm,
        request: &mut RawRequest,
    ) -> ReturnCode;
    /// Start an all-reduce; the result arrives in the completion data.
    fn iallreduce(
        &self,
        sendbuf: &[u8],
        count: i32,
        datatype: RawDatatype,
        op: RawOp,
        comm: RawComm,
        request: &mut RawRequest,
    ) -> ReturnCode;
    /// Start a barrier.
    fn ibarrier(&self, comm: RawComm, request: &mut RawRequest) -> ReturnCode;
    /// Start a broadcast from `root`; every participant receives the data.
    fn ibcast(
        &self,
        buf: &[u8],
        count: i32,
        datatype: RawDatatype,
        root: i32,
        comm: RawComm,
        request: &mut RawRequest,
    ) -> ReturnCode;
    /// Start a gather of `sendcount` elements per participant into `root`.
    fn igather(
        &self,
        sendbuf: &[u8],
        sendcount: i32,
        datatype: RawDatatype,
        recvcount: i32,
        root: i32,
        comm: RawComm,
        request: &mut RawRequest,
    ) -> ReturnCode;
    /// Start a variable-count gather; `recvbuf` is the root's current
    /// receive buffer, which the completion returns with the segments filled.
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
    ) -> ReturnCode;
    /// Start a variable-count scatter from `root`.
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
    ) -> ReturnCode;
    /// Exclusive prefix reduction (blocking). Rank 0's `recvbuf` is left untouched.
    fn exscan(
        &self,
        sendbuf: &[u8],
        recvbuf: &mut [u8],
        count: i32,
        datatype: RawDatatype,
        op: RawOp,
        comm: RawComm,
    ) -> ReturnCode;

    /// Block until `request` completes; resets it to null.
    fn wait(&self, request: &mut RawRequest, completion: &mut Completion) -> ReturnCode;
    /// Poll `request`; on completion resets it to null and sets `flag`.
    fn test(&self, request: &mut RawRequest, flag: &mut bool, completion: &mut Completion) -> ReturnCode;
    /// Block until every request completes; resets all of them to null.
    ///
    /// Returns `ERR_IN_STATUS` when any operation failed; the per-request
    /// codes are in the completions.
    fn waitall(&self, requests: &mut [RawRequest], completions: &mut [Completion]) -> ReturnCode;
    /// Complete every request if all of them have completed, else none.
    fn testall(
        &self,
        requests: &mut [RawRequest],
        flag: &mut bool,
        completions: &mut [Completion],
    ) -> ReturnCode;
}
