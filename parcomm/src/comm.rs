//! Communicators and the operations issued through them.
//!
//! A [`Communicator`] is an owned handle like any other; the predefined
//! world and self communicators are wrapped unowned, while everything derived
//! from them ([`Communicator::duplicate`], [`Communicator::split`],
//! [`Communicator::split_by_locality`], [`Communicator::cartesian_create`])
//! is owned and freed on drop.
//!
//! Non-blocking operations return a [`Request`] borrowing the caller's
//! output buffer for as long as the operation is in flight. Typed variants
//! derive the native datatype from [`Equivalence`]; the `_bytes` variants
//! take an explicit [`Datatype`] and move raw bytes.

use std::sync::Arc;

use tracing::trace;

use crate::datatype::{count_of, decode_into, encode_slice, Datatype, Equivalence};
use crate::errors::{check, Error, Result};
use crate::handle::{HandleKind, OwnedHandle};
use crate::native::{split_type, Native, RawComm, RawDatatype, RawRequest, ReturnCode};
use crate::op::Op;
use crate::request::{Request, Sink};

/// Communicator handle kind.
#[derive(Debug)]
pub struct CommKind;

impl HandleKind for CommKind {
    type Raw = RawComm;
    const NULL: RawComm = RawComm::NULL;
    const LABEL: &'static str = "communicator";

    fn release(native: &dyn Native, raw: &mut RawComm) -> ReturnCode {
        native.comm_free(raw)
    }
}

/// Locality classes for [`Communicator::split_by_locality`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitType {
    /// Participants that can share memory, i.e. run on the same node.
    Shared,
}

impl SplitType {
    const fn raw(self) -> i32 {
        match self {
            Self::Shared => split_type::SHARED,
        }
    }
}

/// Shape of a Cartesian communicator, as seen by the calling participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartTopology {
    /// Extent of each dimension.
    pub dims: Vec<i32>,
    /// Whether each dimension wraps around.
    pub periods: Vec<bool>,
    /// Coordinates of the caller.
    pub coords: Vec<i32>,
}

/// A group of participants together with a communication context.
#[derive(Debug)]
pub struct Communicator {
    handle: OwnedHandle<CommKind>,
}

fn slice_sink<'a, T: Equivalence>(target: &'a mut [T]) -> Sink<'a> {
    Box::new(move |bytes: &[u8]| {
        decode_into(bytes, target);
        Ok(())
    })
}

fn byte_sink(target: &mut [u8]) -> Sink<'_> {
    Box::new(move |bytes: &[u8]| {
        let len = bytes.len().min(target.len());
        target[..len].copy_from_slice(&bytes[..len]);
        Ok(())
    })
}

impl Communicator {
    /// Every participant of the job.
    pub fn world(native: Arc<dyn Native>) -> Self {
        Self {
            handle: OwnedHandle::predefined(native, RawComm::WORLD),
        }
    }

    /// Just the calling participant.
    pub fn solo(native: Arc<dyn Native>) -> Self {
        Self {
            handle: OwnedHandle::predefined(native, RawComm::SELF),
        }
    }

    /// The null communicator. Every operation on it fails.
    pub fn null(native: Arc<dyn Native>) -> Self {
        Self {
            handle: OwnedHandle::null(native),
        }
    }

    fn derive<F>(&self, call: F) -> Result<Self>
    where
        F: FnOnce(&dyn Native, &mut RawComm) -> ReturnCode,
    {
        let handle = OwnedHandle::create(Arc::clone(self.native()), call)?;
        Ok(Self { handle })
    }

    fn check(&self, code: ReturnCode) -> Result<()> {
        check(self.native().as_ref(), code)
    }

    fn issue<'a, F>(&self, sink: Option<Sink<'a>>, call: F) -> Result<Request<'a>>
    where
        F: FnOnce(&dyn Native, RawComm, &mut RawRequest) -> ReturnCode,
    {
        let comm = self.raw();
        Request::issue(Arc::clone(self.native()), sink, |native, out| call(native, comm, out))
    }

    /// Number of participants.
    pub fn size(&self) -> Result<i32> {
        let mut size = 0;
        self.check(self.native().comm_size(self.raw(), &mut size))?;
        Ok(size)
    }

    /// Rank of the caller, in `0..size`.
    pub fn rank(&self) -> Result<i32> {
        let mut rank = 0;
        self.check(self.native().comm_rank(self.raw(), &mut rank))?;
        Ok(rank)
    }

    /// Start sending `buf` to `dest`.
    pub fn isend<'a, T: Equivalence>(&self, buf: &'a [T], dest: i32, tag: i32) -> Result<Request<'a>> {
        let count = count_of(buf.len())?;
        let bytes = encode_slice(buf);
        trace!(dest, tag, count, "isend");
        self.issue(None, |native, comm, out| {
            native.isend(&bytes, count, T::DATATYPE, dest, tag, comm, out)
        })
    }

    /// Start receiving into `buf`. `source` and `tag` accept the
    /// [`ANY_SOURCE`](crate::native::ANY_SOURCE) and
    /// [`ANY_TAG`](crate::native::ANY_TAG) wildcards.
    pub fn irecv<'a, T: Equivalence>(&self, buf: &'a mut [T], source: i32, tag: i32) -> Result<Request<'a>> {
        let count = count_of(buf.len())?;
        trace!(source, tag, count, "irecv");
        self.issue(Some(slice_sink(buf)), |native, comm, out| {
            native.irecv(count, T::DATATYPE, source, tag, comm, out)
        })
    }

    /// Start sending `count` elements of `datatype` laid out in `buf`.
    pub fn isend_bytes<'a>(
        &self,
        buf: &'a [u8],
        count: i32,
        datatype: &Datatype,
        dest: i32,
        tag: i32,
    ) -> Result<Request<'a>> {
        let datatype = datatype.raw();
        self.issue(None, |native, comm, out| native.isend(buf, count, datatype, dest, tag, comm, out))
    }

    /// Start receiving up to `count` elements of `datatype` into `buf`.
    pub fn irecv_bytes<'a>(
        &self,
        buf: &'a mut [u8],
        count: i32,
        datatype: &Datatype,
        source: i32,
        tag: i32,
    ) -> Result<Request<'a>> {
        let datatype = datatype.raw();
        self.issue(Some(byte_sink(buf)), |native, comm, out| {
            native.irecv(count, datatype, source, tag, comm, out)
        })
    }

    /// Start combining every participant's `send` with `op`; all of them
    /// receive the result in `recv`.
    pub fn iallreduce<'a, T: Equivalence>(&self, send: &[T], recv: &'a mut [T], op: &Op) -> Result<Request<'a>> {
        if recv.len() < send.len() {
            return Err(Error::misuse(format!(
                "all-reduce receive buffer holds {} elements, {} are sent",
                recv.len(),
                send.len()
            )));
        }
        let count = count_of(send.len())?;
        let bytes = encode_slice(send);
        let op = op.raw();
        self.issue(Some(slice_sink(recv)), |native, comm, out| {
            native.iallreduce(&bytes, count, T::DATATYPE, op, comm, out)
        })
    }

    /// All-reduce where `buf` is both this participant's contribution and
    /// the destination of the result.
    pub fn iallreduce_in_place<'a, T: Equivalence>(&self, buf: &'a mut [T], op: &Op) -> Result<Request<'a>> {
        let count = count_of(buf.len())?;
        let bytes = encode_slice(buf);
        let op = op.raw();
        self.issue(Some(slice_sink(buf)), |native, comm, out| {
            native.iallreduce(&bytes, count, T::DATATYPE, op, comm, out)
        })
    }

    /// All-reduce over `count` elements of an explicit datatype.
    pub fn iallreduce_bytes<'a>(
        &self,
        send: &[u8],
        recv: &'a mut [u8],
        count: i32,
        datatype: &Datatype,
        op: &Op,
    ) -> Result<Request<'a>> {
        let datatype = datatype.raw();
        let op = op.raw();
        self.issue(Some(byte_sink(recv)), |native, comm, out| {
            native.iallreduce(send, count, datatype, op, comm, out)
        })
    }

    /// Start a barrier.
    pub fn ibarrier(&self) -> Result<Request<'static>> {
        self.issue(None, |native, comm, out| native.ibarrier(comm, out))
    }

    /// Broadcast one value from `root`.
    pub fn ibcast<'a, T: Equivalence>(&self, value: &'a mut T, root: i32) -> Result<Request<'a>> {
        self.ibcast_slice(std::slice::from_mut(value), root)
    }

    /// Broadcast a fixed-length buffer from `root`.
    pub fn ibcast_slice<'a, T: Equivalence>(&self, buf: &'a mut [T], root: i32) -> Result<Request<'a>> {
        let count = count_of(buf.len())?;
        let bytes = encode_slice(buf);
        self.issue(Some(slice_sink(buf)), |native, comm, out| {
            native.ibcast(&bytes, count, T::DATATYPE, root, comm, out)
        })
    }

    /// Broadcast the length of a buffer held by `root` and wait for it.
    fn broadcast_len(&self, len: usize, root: i32) -> Result<usize> {
        let mut len = len as u64;
        self.ibcast(&mut len, root)?.wait()?;
        usize::try_from(len).map_err(|_| Error::misuse(format!("broadcast length {len} does not fit in memory")))
    }

    /// Broadcast a vector whose length only `root` knows.
    ///
    /// The length is broadcast and waited for first; the returned request
    /// covers the payload only. Non-root vectors are resized to fit.
    pub fn ibcast_vec<'a, T>(&self, buf: &'a mut Vec<T>, root: i32) -> Result<Request<'a>>
    where
        T: Equivalence + Default,
    {
        let len = self.broadcast_len(buf.len(), root)?;
        buf.resize(len, T::default());
        self.ibcast_slice(buf.as_mut_slice(), root)
    }

    /// Broadcast a string whose length only `root` knows, in two phases like
    /// [`Communicator::ibcast_vec`].
    pub fn ibcast_string<'a>(&self, text: &'a mut String, root: i32) -> Result<Request<'a>> {
        let len = self.broadcast_len(text.len(), root)?;
        let count = count_of(len)?;
        let mut payload = text.as_bytes().to_vec();
        payload.resize(len, 0);
        let sink: Sink<'a> = Box::new(move |bytes: &[u8]| {
            *text = String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::misuse("broadcast text is not valid UTF-8"))?;
            Ok(())
        });
        self.issue(Some(sink), |native, comm, out| {
            native.ibcast(&payload, count, RawDatatype::CHAR, root, comm, out)
        })
    }

    /// Gather one value from every participant into `recv` at `root`.
    ///
    /// `recv` must hold `size()` elements at the root and is ignored
    /// elsewhere.
    pub fn igather<'a, T: Equivalence>(&self, send: &T, recv: &'a mut [T], root: i32) -> Result<Request<'a>> {
        if self.rank()? == root {
            let size = self.size()? as usize;
            if recv.len() < size {
                return Err(Error::misuse(format!(
                    "gather receive buffer holds {} elements, {size} participants contribute",
                    recv.len()
                )));
            }
        }
        let bytes = encode_slice(std::slice::from_ref(send));
        self.issue(Some(slice_sink(recv)), |native, comm, out| {
            native.igather(&bytes, 1, T::DATATYPE, 1, root, comm, out)
        })
    }

    /// Gather a variable number of values from every participant.
    ///
    /// At the root, participant `r` contributes `recv_counts[r]` elements
    /// placed at offset `displacements[r]` of `recv`; elements no segment
    /// covers keep their value.
    pub fn igatherv<'a, T: Equivalence>(
        &self,
        send: &[T],
        recv: &'a mut [T],
        recv_counts: &[i32],
        displacements: &[i32],
        root: i32,
    ) -> Result<Request<'a>> {
        let count = count_of(send.len())?;
        let send_bytes = encode_slice(send);
        let recv_bytes = encode_slice(recv);
        self.issue(Some(slice_sink(recv)), |native, comm, out| {
            native.igatherv(
                &send_bytes,
                count,
                T::DATATYPE,
                &recv_bytes,
                recv_counts,
                displacements,
                root,
                comm,
                out,
            )
        })
    }

    /// Scatter variable-size segments of `send` from `root`; participant `r`
    /// receives `send_counts[r]` elements starting at `displacements[r]`.
    pub fn iscatterv<'a, T: Equivalence>(
        &self,
        send: &[T],
        send_counts: &[i32],
        displacements: &[i32],
        recv: &'a mut [T],
        root: i32,
    ) -> Result<Request<'a>> {
        let count = count_of(recv.len())?;
        let bytes = encode_slice(send);
        self.issue(Some(slice_sink(recv)), |native, comm, out| {
            native.iscatterv(&bytes, send_counts, displacements, T::DATATYPE, count, root, comm, out)
        })
    }

    /// Exclusive prefix reduction. Blocks until this participant's result is
    /// known; rank 0 receives nothing and `recv` keeps its value.
    pub fn exscan<T: Equivalence>(&self, send: &T, recv: &mut T, op: &Op) -> Result<()> {
        let send_bytes = encode_slice(std::slice::from_ref(send));
        let mut recv_bytes = encode_slice(std::slice::from_ref(recv));
        let code = self
            .native()
            .exscan(&send_bytes, &mut recv_bytes, 1, T::DATATYPE, op.raw(), self.raw());
        self.check(code)?;
        *recv = T::decode(&recv_bytes);
        Ok(())
    }

    /// A new communicator with the same group and a separate context.
    pub fn duplicate(&self) -> Result<Self> {
        let comm = self.raw();
        self.derive(|native, out| native.comm_dup(comm, out))
    }

    /// Partition by `color`; within a part ranks follow `key`, then the
    /// original rank. Participants passing [`UNDEFINED`](crate::native::UNDEFINED)
    /// get the null communicator.
    pub fn split(&self, color: i32, key: i32) -> Result<Self> {
        let comm = self.raw();
        self.derive(|native, out| native.comm_split(comm, color, key, out))
    }

    /// Partition by locality class, ordering each part by `key`.
    pub fn split_by_locality(&self, split: SplitType, key: i32) -> Result<Self> {
        let comm = self.raw();
        self.derive(|native, out| native.comm_split_type(comm, split.raw(), key, out))
    }

    /// A new communicator carrying a Cartesian grid of `dims`.
    ///
    /// Participants that do not fit in the grid get the null communicator.
    pub fn cartesian_create(&self, dims: &[i32], periods: &[bool], reorder: bool) -> Result<Self> {
        if dims.len() != periods.len() {
            return Err(Error::misuse(format!(
                "{} dimensions but {} periodicity flags",
                dims.len(),
                periods.len()
            )));
        }
        let comm = self.raw();
        self.derive(|native, out| native.cart_create(comm, dims, periods, reorder, out))
    }

    /// Number of Cartesian dimensions.
    pub fn dimension_count(&self) -> Result<i32> {
        let mut ndims = 0;
        self.check(self.native().cartdim_get(self.raw(), &mut ndims))?;
        Ok(ndims)
    }

    /// Grid shape and the caller's coordinates.
    pub fn topology(&self) -> Result<CartTopology> {
        let ndims = usize::try_from(self.dimension_count()?).unwrap_or(0);
        let mut topology = CartTopology {
            dims: vec![0; ndims],
            periods: vec![false; ndims],
            coords: vec![0; ndims],
        };
        let code = self.native().cart_get(
            self.raw(),
            &mut topology.dims,
            &mut topology.periods,
            &mut topology.coords,
        );
        self.check(code)?;
        Ok(topology)
    }

    /// Rank at `coords`; periodic dimensions wrap.
    pub fn rank_from_coordinates(&self, coords: &[i32]) -> Result<i32> {
        let mut rank = 0;
        self.check(self.native().cart_rank(self.raw(), coords, &mut rank))?;
        Ok(rank)
    }

    /// Grid coordinates of `rank`.
    pub fn coordinates_from_rank(&self, rank: i32) -> Result<Vec<i32>> {
        let ndims = usize::try_from(self.dimension_count()?).unwrap_or(0);
        let mut coords = vec![0; ndims];
        self.check(self.native().cart_coords(self.raw(), rank, &mut coords))?;
        Ok(coords)
    }

    /// The raw handle.
    pub const fn raw(&self) -> RawComm {
        self.handle.raw()
    }

    /// Whether this is the null communicator.
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    /// Whether this value frees the communicator when dropped.
    pub const fn is_owned(&self) -> bool {
        self.handle.is_owned()
    }

    /// Move the communicator out, leaving a null one behind.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            handle: self.handle.take(),
        }
    }

    /// Free the communicator now, reporting a failure instead of aborting.
    pub fn release(self) -> Result<()> {
        self.handle.release()
    }

    /// The library this communicator belongs to.
    pub fn native(&self) -> &Arc<dyn Native> {
        self.handle.native()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{codes, ANY_SOURCE, ANY_TAG, UNDEFINED};
    use crate::request::wait_all;
    use crate::testing::{CountingNative, Entry, StubNative};

    #[test]
    fn world_and_self_have_one_member_on_a_lone_participant() {
        let native = StubNative::new().shared();
        let world = Communicator::world(Arc::clone(&native));
        let solo = Communicator::solo(native);

        assert_eq!((world.size().unwrap(), world.rank().unwrap()), (1, 0));
        assert_eq!((solo.size().unwrap(), solo.rank().unwrap()), (1, 0));
        assert!(!world.is_owned());
    }

    #[test]
    fn null_communicator_fails_without_crashing() {
        let native = StubNative::new().shared();
        let null = Communicator::null(native);

        assert_eq!(null.size().unwrap_err().code(), Some(codes::ERR_COMM));
        assert_eq!(null.rank().unwrap_err().code(), Some(codes::ERR_COMM));
        assert_eq!(null.duplicate().unwrap_err().code(), Some(codes::ERR_COMM));
        assert_eq!(null.ibarrier().unwrap_err().code(), Some(codes::ERR_COMM));
    }

    #[test]
    fn derived_communicators_are_freed_exactly_once() {
        let counting = CountingNative::new(StubNative::new());
        let world = Communicator::world(counting.shared());

        let dup = world.duplicate().unwrap();
        let part = world.split(0, 0).unwrap();
        let node = world.split_by_locality(SplitType::Shared, 0).unwrap();
        assert!(dup.is_owned() && part.is_owned() && node.is_owned());

        drop((dup, part, node));
        drop(world);
        assert_eq!(counting.calls(Entry::CommFree), 3);
    }

    #[test]
    fn undefined_color_yields_an_inert_null_communicator() {
        let counting = CountingNative::new(StubNative::new());
        let world = Communicator::world(counting.shared());

        let none = world.split(UNDEFINED, 0).unwrap();
        assert!(none.is_null());
        assert!(!none.is_owned());

        drop(none);
        assert_eq!(counting.calls(Entry::CommFree), 0);
    }

    #[test]
    fn self_send_round_trips_three_integers() {
        let native = StubNative::new().shared();
        let world = Communicator::world(native);
        let sent = [1, 2, 3];
        let mut received = [0i32; 3];

        {
            let mut requests = vec![
                world.isend(&sent, 0, 7).unwrap(),
                world.irecv(&mut received, ANY_SOURCE, ANY_TAG).unwrap(),
            ];
            wait_all(&mut requests).unwrap();
        }

        assert_eq!(received, sent);
    }

    #[test]
    fn recv_status_reports_the_matched_tag() {
        let native = StubNative::new().shared();
        let world = Communicator::world(native);
        let mut received = [0u8; 4];

        world.isend(b"ping", 0, 11).unwrap().wait().unwrap();
        let status = world.irecv(&mut received, 0, 11).unwrap().wait_with_status().unwrap();

        assert_eq!(status.tag(), 11);
        assert_eq!(status.source(), 0);
        assert_eq!(&received, b"ping");
    }

    #[test]
    fn byte_variants_use_the_explicit_datatype() {
        let native = StubNative::new().shared();
        let world = Communicator::world(Arc::clone(&native));
        let pair = Datatype::contiguous(2, &Datatype::int(native)).unwrap();

        let sent: Vec<u8> = [5i32, 6].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let mut received = [0u8; 8];
        world.isend_bytes(&sent, 1, &pair, 0, 0).unwrap().wait().unwrap();
        world.irecv_bytes(&mut received, 1, &pair, 0, 0).unwrap().wait().unwrap();

        assert_eq!(received.as_slice(), sent.as_slice());
    }

    #[test]
    fn allreduce_on_one_participant_returns_the_contribution() {
        let native = StubNative::new().shared();
        let world = Communicator::world(Arc::clone(&native));
        let sum = Op::sum(native);
        let mut result = [0.0f64; 2];

        world.iallreduce(&[1.5, 2.5], &mut result, &sum).unwrap().wait().unwrap();
        assert_eq!(result, [1.5, 2.5]);

        let mut in_place = [3u32];
        world.iallreduce_in_place(&mut in_place, &sum).unwrap().wait().unwrap();
        assert_eq!(in_place, [3]);
    }

    #[test]
    fn allreduce_rejects_a_short_receive_buffer() {
        let native = StubNative::new().shared();
        let world = Communicator::world(Arc::clone(&native));
        let mut result = [0i32; 1];

        let error = world.iallreduce(&[1, 2], &mut result, &Op::sum(native)).unwrap_err();
        assert!(error.is_misuse());
    }

    #[test]
    fn string_broadcast_runs_in_two_phases() {
        let counting = CountingNative::new(StubNative::new());
        let world = Communicator::world(counting.shared());
        let mut text = String::from("hello world");

        world.ibcast_string(&mut text, 0).unwrap().wait().unwrap();

        assert_eq!(text, "hello world");
        assert_eq!(counting.calls(Entry::Ibcast), 2);
        assert_eq!(counting.calls(Entry::Wait), 2);
    }

    #[test]
    fn vec_broadcast_keeps_the_root_payload() {
        let native = StubNative::new().shared();
        let world = Communicator::world(native);
        let mut values = vec![4i64, 5, 6];

        world.ibcast_vec(&mut values, 0).unwrap().wait().unwrap();
        assert_eq!(values, [4, 5, 6]);
    }

    #[test]
    fn gather_family_on_a_lone_participant() {
        let native = StubNative::new().shared();
        let world = Communicator::world(native);

        let mut gathered = [0i32; 1];
        world.igather(&9, &mut gathered, 0).unwrap().wait().unwrap();
        assert_eq!(gathered, [9]);

        let mut segments = [-1i32; 4];
        world
            .igatherv(&[7, 8], &mut segments, &[2], &[1], 0)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(segments, [-1, 7, 8, -1]);

        let mut piece = [0i32; 2];
        world
            .iscatterv(&[1, 2, 3, 4], &[2], &[2], &mut piece, 0)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(piece, [3, 4]);
    }

    #[test]
    fn exscan_leaves_rank_zero_untouched() {
        let native = StubNative::new().shared();
        let world = Communicator::world(Arc::clone(&native));
        let mut prefix = -5i32;

        world.exscan(&10, &mut prefix, &Op::sum(native)).unwrap();
        assert_eq!(prefix, -5);
    }

    #[test]
    fn cartesian_queries_on_a_single_cell_grid() {
        let native = StubNative::new().shared();
        let world = Communicator::world(native);

        let grid = world.cartesian_create(&[1, 1], &[true, false], false).unwrap();
        assert_eq!(grid.dimension_count().unwrap(), 2);
        assert_eq!(
            grid.topology().unwrap(),
            CartTopology {
                dims: vec![1, 1],
                periods: vec![true, false],
                coords: vec![0, 0],
            }
        );
        assert_eq!(grid.rank_from_coordinates(&[3, 0]).unwrap(), 0);
        assert_eq!(grid.coordinates_from_rank(0).unwrap(), [0, 0]);
    }

    #[test]
    fn cartesian_create_checks_argument_lengths_locally() {
        let counting = CountingNative::new(StubNative::new());
        let world = Communicator::world(counting.shared());

        assert!(world.cartesian_create(&[1, 1], &[true], false).unwrap_err().is_misuse());
        assert_eq!(counting.calls(Entry::CartCreate), 0);
    }

    #[test]
    fn grids_too_large_to_count_are_rejected() {
        let native = StubNative::new().shared();
        let world = Communicator::world(native);

        let error = world.cartesian_create(&[65536; 4], &[false; 4], false).unwrap_err();
        assert_eq!(error.code(), Some(codes::ERR_DIMS));
    }

    #[test]
    fn short_gather_buffer_at_root_is_misuse() {
        let counting = CountingNative::new(StubNative::new());
        let world = Communicator::world(counting.shared());
        let mut recv: [i32; 0] = [];

        assert!(world.igather(&1, &mut recv, 0).unwrap_err().is_misuse());
        assert_eq!(counting.calls(Entry::Igather), 0);
    }

    #[test]
    fn topology_queries_need_a_cartesian_communicator() {
        let native = StubNative::new().shared();
        let dup = Communicator::world(native).duplicate().unwrap();

        assert_eq!(dup.dimension_count().unwrap_err().code(), Some(codes::ERR_TOPOLOGY));
    }

    #[test]
    fn take_moves_ownership_out() {
        let counting = CountingNative::new(StubNative::new());
        let world = Communicator::world(counting.shared());
        let mut dup = world.duplicate().unwrap();

        let moved = dup.take();
        assert!(dup.is_null());
        drop(dup);
        assert_eq!(counting.calls(Entry::CommFree), 0);

        moved.release().unwrap();
        assert_eq!(counting.calls(Entry::CommFree), 1);
    }
}
