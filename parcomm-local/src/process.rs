//! One participant's view of a universe.

use std::fmt;
use std::sync::Arc;

use parcomm::native::{
    codes, Completion, Native, RawComm, RawDatatype, RawOp, RawRequest, ReturnCode, UserFunction,
};
use tracing::trace;

use crate::state::{Contribution, Delivery, Group, Outcome, Shared, State};

/// The library as seen by one participant of a
/// [`LocalUniverse`](crate::LocalUniverse).
///
/// Every entry point takes the universe lock for the duration of the call.
/// Blocking entry points (`wait`, the blocking collectives) release it while
/// they sleep on the universe's condition variable.
pub struct LocalProcess {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalProcess {
    pub(crate) fn new(rank: usize, shared: Arc<Shared>) -> Self {
        Self { rank, shared }
    }

    /// World rank of this participant.
    pub fn world_rank(&self) -> usize {
        self.rank
    }

    /// Run `operation` against the state of an active participant.
    fn with_state<T>(&self, operation: impl FnOnce(&mut State, usize) -> Outcome<T>) -> Outcome<T> {
        let mut state = self.shared.lock();
        state.check_active(self.rank)?;
        let outcome = operation(&mut state, self.rank);
        drop(state);
        self.shared.notify();
        outcome
    }

    /// Join the next collective on `comm` and wait for its outcome.
    fn blocking(
        &self,
        comm: RawComm,
        build: impl FnOnce(&State, &Group) -> Outcome<Contribution>,
    ) -> Outcome<Delivery> {
        let mut state = self.shared.lock();
        state.check_active(self.rank)?;
        let group = state.group(comm, self.rank)?;
        let contribution = build(&state, &group)?;
        let key = state.contribute(self.rank, &group, contribution)?;
        self.shared.notify();
        self.shared.block_until(&mut state, |state| state.collect(key, group.rank))
    }

    /// Join the next collective on `comm` and hand back a request for it.
    fn start(
        &self,
        comm: RawComm,
        request: &mut RawRequest,
        build: impl FnOnce(&State, &Group) -> Outcome<Contribution>,
    ) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            let group = state.group(comm, me)?;
            let contribution = build(state, &group)?;
            *request = state.start_collective(me, &group, contribution)?;
            Ok(())
        }))
    }

    fn derive(&self, comm: RawComm, newcomm: &mut RawComm, build: impl FnOnce(&State, &Group) -> Outcome<Contribution>) -> ReturnCode {
        code_of(self.blocking(comm, build).map(|delivery| *newcomm = delivery.comm))
    }
}

fn code_of(outcome: Outcome<()>) -> ReturnCode {
    match outcome {
        Ok(()) => codes::SUCCESS,
        Err(code) => code,
    }
}

fn leading(buf: &[u8], bytes: usize) -> Outcome<Vec<u8>> {
    buf.get(..bytes).map(<[u8]>::to_vec).ok_or(codes::ERR_BUFFER)
}

fn fill<T: Copy>(out: &mut [T], values: &[T]) -> Outcome<()> {
    out.get_mut(..values.len())
        .ok_or(codes::ERR_ARG)?
        .copy_from_slice(values);
    Ok(())
}

impl Native for LocalProcess {
    fn initialized(&self, flag: &mut bool) -> ReturnCode {
        *flag = self.shared.lock().is_initialized(self.rank);
        codes::SUCCESS
    }

    fn init(&self, args: &mut Vec<String>) -> ReturnCode {
        code_of(self.shared.lock().init(self.rank, args))
    }

    fn finalized(&self, flag: &mut bool) -> ReturnCode {
        *flag = self.shared.lock().is_finalized(self.rank);
        codes::SUCCESS
    }

    fn finalize(&self) -> ReturnCode {
        let outcome = self.shared.lock().finalize(self.rank);
        self.shared.notify();
        code_of(outcome)
    }

    fn error_string(&self, code: ReturnCode, buf: &mut [u8], resultlen: &mut usize) -> ReturnCode {
        if buf.is_empty() {
            return codes::ERR_BUFFER;
        }
        let text = codes::description(code).map_or_else(|| format!("unknown error code {code}"), str::to_owned);
        let len = text.len().min(buf.len() - 1);
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        buf[len] = 0;
        *resultlen = len;
        codes::SUCCESS
    }

    fn comm_size(&self, comm: RawComm, size: &mut i32) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            *size = state.group(comm, me)?.size() as i32;
            Ok(())
        }))
    }

    fn comm_rank(&self, comm: RawComm, rank: &mut i32) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            *rank = state.group(comm, me)?.rank as i32;
            Ok(())
        }))
    }

    fn comm_dup(&self, comm: RawComm, newcomm: &mut RawComm) -> ReturnCode {
        self.derive(comm, newcomm, |_, group| Ok(Contribution::dup(group)))
    }

    fn comm_split(&self, comm: RawComm, color: i32, key: i32, newcomm: &mut RawComm) -> ReturnCode {
        self.derive(comm, newcomm, |_, _| Contribution::split(color, key))
    }

    fn comm_split_type(&self, comm: RawComm, split_type: i32, key: i32, newcomm: &mut RawComm) -> ReturnCode {
        let me = self.rank;
        self.derive(comm, newcomm, |state, _| Contribution::split(state.split_color(me, split_type)?, key))
    }

    fn comm_free(&self, comm: &mut RawComm) -> ReturnCode {
        code_of(self.with_state(|state, me| state.comm_free(me, comm)))
    }

    fn cart_create(
        &self,
        comm: RawComm,
        dims: &[i32],
        periods: &[bool],
        reorder: bool,
        newcomm: &mut RawComm,
    ) -> ReturnCode {
        // Ranks keep their order; there is no placement to optimize.
        trace!(reorder, "creating cartesian communicator");
        self.derive(comm, newcomm, |state, group| state.cart(group, dims, periods))
    }

    fn cartdim_get(&self, comm: RawComm, ndims: &mut i32) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            let grid = state.group(comm, me)?.cartesian.ok_or(codes::ERR_TOPOLOGY)?;
            *ndims = grid.dims.len() as i32;
            Ok(())
        }))
    }

    fn cart_get(&self, comm: RawComm, dims: &mut [i32], periods: &mut [bool], coords: &mut [i32]) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            let group = state.group(comm, me)?;
            let grid = group.cartesian.as_ref().ok_or(codes::ERR_TOPOLOGY)?;
            fill(dims, &grid.dims)?;
            fill(periods, &grid.periods)?;
            fill(coords, &grid.coords_of(group.rank))
        }))
    }

    fn cart_rank(&self, comm: RawComm, coords: &[i32], rank: &mut i32) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            let grid = state.group(comm, me)?.cartesian.ok_or(codes::ERR_TOPOLOGY)?;
            *rank = grid.rank_of(coords)? as i32;
            Ok(())
        }))
    }

    fn cart_coords(&self, comm: RawComm, rank: i32, coords: &mut [i32]) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            let group = state.group(comm, me)?;
            let grid = group.cartesian.as_ref().ok_or(codes::ERR_TOPOLOGY)?;
            let rank = usize::try_from(rank)
                .ok()
                .filter(|&rank| rank < group.size())
                .ok_or(codes::ERR_RANK)?;
            fill(coords, &grid.coords_of(rank))
        }))
    }

    fn type_contiguous(&self, count: i32, oldtype: RawDatatype, newtype: &mut RawDatatype) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            *newtype = state.type_contiguous(me, count, oldtype)?;
            Ok(())
        }))
    }

    fn type_commit(&self, datatype: &mut RawDatatype) -> ReturnCode {
        code_of(self.with_state(|state, me| state.type_commit(me, *datatype)))
    }

    fn type_size(&self, datatype: RawDatatype, size: &mut i32) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            *size = i32::try_from(state.type_size(me, datatype)?).map_err(|_| codes::ERR_COUNT)?;
            Ok(())
        }))
    }

    fn type_free(&self, datatype: &mut RawDatatype) -> ReturnCode {
        code_of(self.with_state(|state, me| state.type_free(me, datatype)))
    }

    // Folds always run in rank order, so commutativity never changes a result.
    fn op_create(&self, function: UserFunction, _commute: bool, op: &mut RawOp) -> ReturnCode {
        code_of(self.with_state(|state, me| {
            *op = state.op_create(me, function);
            Ok(())
        }))
    }

    fn op_free(&self, op: &mut RawOp) -> ReturnCode {
        code_of(self.with_state(|state, me| state.op_free(me, op)))
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
        code_of(self.with_state(|state, me| {
            let group = state.group(comm, me)?;
            let layout = state.layout(me, count, datatype)?;
            *request = state.isend(me, buf, layout, dest, tag, &group)?;
            Ok(())
        }))
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
        code_of(self.with_state(|state, me| {
            let group = state.group(comm, me)?;
            let layout = state.layout(me, count, datatype)?;
            *request = state.irecv(me, layout, source, tag, &group)?;
            Ok(())
        }))
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
        let me = self.rank;
        self.start(comm, request, |state, _| {
            let layout = state.layout(me, count, datatype)?;
            Ok(Contribution::allreduce(state.reduction(me, layout, op, sendbuf)?))
        })
    }

    fn ibarrier(&self, comm: RawComm, request: &mut RawRequest) -> ReturnCode {
        self.start(comm, request, |_, _| Ok(Contribution::barrier()))
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
        let me = self.rank;
        self.start(comm, request, |state, group| {
            let layout = state.layout(me, count, datatype)?;
            state.bcast(group, root, leading(buf, layout.bytes())?)
        })
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
        let me = self.rank;
        self.start(comm, request, |state, group| {
            let sent = state.layout(me, sendcount, datatype)?;
            let expected = state.layout(me, recvcount, datatype)?;
            state.gather(group, root, leading(sendbuf, sent.bytes())?, expected.bytes())
        })
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
        let me = self.rank;
        self.start(comm, request, |state, group| {
            let sent = state.layout(me, sendcount, datatype)?;
            let unit = state.layout(me, 1, datatype)?.bytes();
            let data = leading(sendbuf, sent.bytes())?;
            state.gatherv(group, root, data, recvbuf, recvcounts, displs, unit)
        })
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
        let me = self.rank;
        self.start(comm, request, |state, group| {
            let unit = state.layout(me, 1, datatype)?.bytes();
            let capacity = state.layout(me, recvcount, datatype)?.bytes();
            state.scatterv(group, root, sendbuf, sendcounts, displs, unit, capacity)
        })
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
        let me = self.rank;
        let capacity = recvbuf.len();
        let outcome = self.blocking(comm, |state, _| {
            let layout = state.layout(me, count, datatype)?;
            if capacity < layout.bytes() {
                return Err(codes::ERR_BUFFER);
            }
            Ok(Contribution::exscan(state.reduction(me, layout, op, sendbuf)?))
        });
        code_of(outcome.and_then(|delivery| match delivery.data {
            Some(prefix) => fill(recvbuf, &prefix),
            None => Ok(()),
        }))
    }

    fn wait(&self, request: &mut RawRequest, completion: &mut Completion) -> ReturnCode {
        if request.is_null() {
            *completion = Completion::default();
            return codes::SUCCESS;
        }
        let raw = *request;
        let mut state = self.shared.lock();
        if let Err(code) = state.check_active(self.rank).and_then(|()| state.check_request(self.rank, raw)) {
            return code;
        }
        let outcome = self.shared.block_until(&mut state, |state| state.poll(raw));
        drop(state);
        self.shared.notify();
        *request = RawRequest::NULL;
        match outcome {
            Ok(done) => {
                *completion = done;
                codes::SUCCESS
            }
            Err(code) => code,
        }
    }

    fn test(&self, request: &mut RawRequest, flag: &mut bool, completion: &mut Completion) -> ReturnCode {
        if request.is_null() {
            *flag = true;
            *completion = Completion::default();
            return codes::SUCCESS;
        }
        let raw = *request;
        let mut state = self.shared.lock();
        if let Err(code) = state.check_active(self.rank).and_then(|()| state.check_request(self.rank, raw)) {
            return code;
        }
        if !state.is_ready(raw) {
            *flag = false;
            return codes::SUCCESS;
        }
        match state.poll(raw) {
            Some(Ok(done)) => {
                *flag = true;
                *completion = done;
                *request = RawRequest::NULL;
                codes::SUCCESS
            }
            Some(Err(code)) => {
                *request = RawRequest::NULL;
                code
            }
            None => {
                *flag = false;
                codes::SUCCESS
            }
        }
    }

    fn waitall(&self, requests: &mut [RawRequest], completions: &mut [Completion]) -> ReturnCode {
        if completions.len() < requests.len() {
            return codes::ERR_ARG;
        }
        let mut result = codes::SUCCESS;
        for (request, completion) in requests.iter_mut().zip(completions.iter_mut()) {
            let code = self.wait(request, completion);
            if code != codes::SUCCESS {
                completion.status.error = code;
                *request = RawRequest::NULL;
                result = codes::ERR_IN_STATUS;
            }
        }
        result
    }

    fn testall(&self, requests: &mut [RawRequest], flag: &mut bool, completions: &mut [Completion]) -> ReturnCode {
        if completions.len() < requests.len() {
            return codes::ERR_ARG;
        }
        {
            let state = self.shared.lock();
            if let Err(code) = state.check_active(self.rank) {
                return code;
            }
            if !requests.iter().all(|&request| request.is_null() || state.is_ready(request)) {
                *flag = false;
                return codes::SUCCESS;
            }
        }
        *flag = true;
        self.waitall(requests, completions)
    }
}

impl fmt::Debug for LocalProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProcess").field("rank", &self.rank).finish_non_exhaustive()
    }
}
