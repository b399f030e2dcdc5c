//! Single-participant native library.
//!
//! `StubNative` behaves like a job of exactly one participant: every
//! communicator has size 1, collectives complete with the caller's own
//! contribution and messages are delivered back to the sender. It keeps the
//! handle tables a real library keeps, so releasing an unknown or predefined
//! handle fails the same way, and it can hold requests pending for a number of
//! polls to exercise `test()` loops.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::native::{
    codes, Completion, Native, RawComm, RawDatatype, RawOp, RawRequest, RawStatus, ReturnCode,
    UserFunction, ANY_SOURCE, ANY_TAG, PROC_NULL, UNDEFINED,
};

const FIRST_HANDLE: u64 = 0x100;

#[derive(Debug, Clone)]
struct Cartesian {
    dims: Vec<i32>,
    periods: Vec<bool>,
}

#[derive(Debug)]
struct Message {
    comm: RawComm,
    tag: i32,
    data: Vec<u8>,
}

#[derive(Debug)]
enum Outcome {
    Ready(Completion),
    Receive {
        comm: RawComm,
        tag: i32,
        capacity: usize,
    },
}

#[derive(Debug)]
struct Pending {
    polls_left: usize,
    outcome: Outcome,
}

#[derive(Debug, Default)]
struct StubState {
    initialized: bool,
    finalized: bool,
    next_handle: u64,
    pending_polls: usize,
    comms: HashMap<RawComm, Option<Cartesian>>,
    types: HashMap<RawDatatype, (usize, bool)>,
    ops: HashSet<RawOp>,
    requests: HashMap<RawRequest, Pending>,
    messages: VecDeque<Message>,
}

impl StubState {
    fn allocate(&mut self) -> u64 {
        if self.next_handle < FIRST_HANDLE {
            self.next_handle = FIRST_HANDLE;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn comm_valid(&self, comm: RawComm) -> bool {
        comm == RawComm::WORLD || comm == RawComm::SELF || self.comms.contains_key(&comm)
    }

    fn type_size(&self, datatype: RawDatatype) -> Option<usize> {
        datatype
            .predefined_size()
            .or_else(|| self.types.get(&datatype).filter(|(_, committed)| *committed).map(|(size, _)| *size))
    }

    fn op_valid(&self, op: RawOp) -> bool {
        (RawOp::SUM.0..=RawOp::LAND.0).contains(&op.0) || self.ops.contains(&op)
    }

    fn bytes_for(&self, count: i32, datatype: RawDatatype) -> Result<usize, ReturnCode> {
        if count < 0 {
            return Err(codes::ERR_COUNT);
        }
        let size = self.type_size(datatype).ok_or(codes::ERR_TYPE)?;
        Ok(count as usize * size)
    }

    fn new_comm(&mut self, cartesian: Option<Cartesian>) -> RawComm {
        let comm = RawComm(self.allocate());
        self.comms.insert(comm, cartesian);
        comm
    }

    fn start(&mut self, outcome: Outcome) -> RawRequest {
        let request = RawRequest(self.allocate());
        let polls_left = self.pending_polls;
        self.requests.insert(request, Pending { polls_left, outcome });
        request
    }

    fn ready(&mut self, data: Option<Vec<u8>>) -> RawRequest {
        self.start(Outcome::Ready(Completion {
            status: RawStatus {
                source: 0,
                tag: ANY_TAG,
                error: codes::SUCCESS,
            },
            data,
        }))
    }

    /// Resolve a request if its operation can complete now.
    fn resolve(&mut self, request: RawRequest) -> Option<Result<Completion, ReturnCode>> {
        let pending = self.requests.get(&request)?;
        let completion = match &pending.outcome {
            Outcome::Ready(completion) => Ok(completion.clone()),
            Outcome::Receive { comm, tag, capacity } => {
                let position = self
                    .messages
                    .iter()
                    .position(|m| m.comm == *comm && (*tag == ANY_TAG || m.tag == *tag))?;
                let message = self.messages.remove(position)?;
                if message.data.len() > *capacity {
                    Err(codes::ERR_TRUNCATE)
                } else {
                    Ok(Completion {
                        status: RawStatus {
                            source: 0,
                            tag: message.tag,
                            error: codes::SUCCESS,
                        },
                        data: Some(message.data),
                    })
                }
            }
        };
        self.requests.remove(&request);
        Some(completion)
    }
}

/// A native library for a job of exactly one participant.
#[derive(Clone, Default)]
pub struct StubNative {
    state: Arc<Mutex<StubState>>,
}

impl StubNative {
    /// A fresh library with no pending delay on requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every new request pending for `polls` calls to `test`.
    #[must_use]
    pub fn with_pending_polls(self, polls: usize) -> Self {
        self.state.lock().pending_polls = polls;
        self
    }

    /// This library as a shared handle.
    pub fn shared(&self) -> Arc<dyn Native> {
        Arc::new(self.clone())
    }

    /// Number of derived communicators, datatypes and operators not yet freed.
    pub fn live_handles(&self) -> usize {
        let state = self.state.lock();
        state.comms.len() + state.types.len() + state.ops.len()
    }

    /// Number of requests that have not completed.
    pub fn outstanding_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    fn issue(
        &self,
        request: &mut RawRequest,
        start: impl FnOnce(&mut StubState) -> Result<RawRequest, ReturnCode>,
    ) -> ReturnCode {
        let mut state = self.state.lock();
        match start(&mut state) {
            Ok(issued) => {
                *request = issued;
                codes::SUCCESS
            }
            Err(code) => code,
        }
    }
}

impl fmt::Debug for StubNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StubNative")
            .field("initialized", &state.initialized)
            .field("finalized", &state.finalized)
            .field("requests", &state.requests.len())
            .finish()
    }
}

fn coords_in_range(cart: &Cartesian, coords: &[i32]) -> bool {
    coords.len() == cart.dims.len()
        && coords
            .iter()
            .zip(cart.dims.iter().zip(&cart.periods))
            .all(|(&c, (&d, &periodic))| periodic || (0..d).contains(&c))
}

impl Native for StubNative {
    fn initialized(&self, flag: &mut bool) -> ReturnCode {
        *flag = self.state.lock().initialized;
        codes::SUCCESS
    }

    fn init(&self, _args: &mut Vec<String>) -> ReturnCode {
        let mut state = self.state.lock();
        if state.initialized {
            return codes::ERR_OTHER;
        }
        state.initialized = true;
        codes::SUCCESS
    }

    fn finalized(&self, flag: &mut bool) -> ReturnCode {
        *flag = self.state.lock().finalized;
        codes::SUCCESS
    }

    fn finalize(&self) -> ReturnCode {
        let mut state = self.state.lock();
        if !state.initialized || state.finalized {
            return codes::ERR_OTHER;
        }
        state.finalized = true;
        codes::SUCCESS
    }

    fn error_string(&self, code: ReturnCode, buf: &mut [u8], resultlen: &mut usize) -> ReturnCode {
        let Some(text) = codes::description(code) else {
            return codes::ERR_ARG;
        };
        if buf.is_empty() {
            return codes::ERR_BUFFER;
        }
        let text = format!("stub: {text}");
        let len = text.len().min(buf.len().saturating_sub(1));
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        buf[len] = 0;
        *resultlen = len;
        codes::SUCCESS
    }

    fn comm_size(&self, comm: RawComm, size: &mut i32) -> ReturnCode {
        if !self.state.lock().comm_valid(comm) {
            return codes::ERR_COMM;
        }
        *size = 1;
        codes::SUCCESS
    }

    fn comm_rank(&self, comm: RawComm, rank: &mut i32) -> ReturnCode {
        if !self.state.lock().comm_valid(comm) {
            return codes::ERR_COMM;
        }
        *rank = 0;
        codes::SUCCESS
    }

    fn comm_dup(&self, comm: RawComm, newcomm: &mut RawComm) -> ReturnCode {
        let mut state = self.state.lock();
        if !state.comm_valid(comm) {
            return codes::ERR_COMM;
        }
        let cartesian = state.comms.get(&comm).cloned().flatten();
        *newcomm = state.new_comm(cartesian);
        codes::SUCCESS
    }

    fn comm_split(&self, comm: RawComm, color: i32, _key: i32, newcomm: &mut RawComm) -> ReturnCode {
        let mut state = self.state.lock();
        if !state.comm_valid(comm) {
            return codes::ERR_COMM;
        }
        *newcomm = if color == UNDEFINED {
            RawComm::NULL
        } else {
            state.new_comm(None)
        };
        codes::SUCCESS
    }

    fn comm_split_type(&self, comm: RawComm, split_type: i32, key: i32, newcomm: &mut RawComm) -> ReturnCode {
        self.comm_split(comm, split_type, key, newcomm)
    }

    fn comm_free(&self, comm: &mut RawComm) -> ReturnCode {
        if self.state.lock().comms.remove(comm).is_none() {
            return codes::ERR_COMM;
        }
        *comm = RawComm::NULL;
        codes::SUCCESS
    }

    fn cart_create(
        &self,
        comm: RawComm,
        dims: &[i32],
        periods: &[bool],
        _reorder: bool,
        newcomm: &mut RawComm,
    ) -> ReturnCode {
        let mut state = self.state.lock();
        if !state.comm_valid(comm) {
            return codes::ERR_COMM;
        }
        if dims.len() != periods.len() || dims.iter().any(|&d| d < 1) {
            return codes::ERR_DIMS;
        }
        match dims.iter().try_fold(1i32, |cells, &dim| cells.checked_mul(dim)) {
            None => return codes::ERR_DIMS,
            Some(cells) if cells > 1 => return codes::ERR_TOPOLOGY,
            Some(_) => {}
        }
        *newcomm = state.new_comm(Some(Cartesian {
            dims: dims.to_vec(),
            periods: periods.to_vec(),
        }));
        codes::SUCCESS
    }

    fn cartdim_get(&self, comm: RawComm, ndims: &mut i32) -> ReturnCode {
        match self.state.lock().comms.get(&comm) {
            Some(Some(cart)) => {
                *ndims = cart.dims.len() as i32;
                codes::SUCCESS
            }
            Some(None) => codes::ERR_TOPOLOGY,
            None => codes::ERR_COMM,
        }
    }

    fn cart_get(&self, comm: RawComm, dims: &mut [i32], periods: &mut [bool], coords: &mut [i32]) -> ReturnCode {
        match self.state.lock().comms.get(&comm) {
            Some(Some(cart)) => {
                let n = cart.dims.len();
                if dims.len() < n || periods.len() < n || coords.len() < n {
                    return codes::ERR_ARG;
                }
                dims[..n].copy_from_slice(&cart.dims);
                periods[..n].copy_from_slice(&cart.periods);
                coords[..n].fill(0);
                codes::SUCCESS
            }
            Some(None) => codes::ERR_TOPOLOGY,
            None => codes::ERR_COMM,
        }
    }

    fn cart_rank(&self, comm: RawComm, coords: &[i32], rank: &mut i32) -> ReturnCode {
        match self.state.lock().comms.get(&comm) {
            Some(Some(cart)) if coords_in_range(cart, coords) => {
                *rank = 0;
                codes::SUCCESS
            }
            Some(Some(_)) => codes::ERR_ARG,
            Some(None) => codes::ERR_TOPOLOGY,
            None => codes::ERR_COMM,
        }
    }

    fn cart_coords(&self, comm: RawComm, rank: i32, coords: &mut [i32]) -> ReturnCode {
        match self.state.lock().comms.get(&comm) {
            Some(Some(cart)) => {
                if rank != 0 {
                    return codes::ERR_RANK;
                }
                if coords.len() < cart.dims.len() {
                    return codes::ERR_ARG;
                }
                coords[..cart.dims.len()].fill(0);
                codes::SUCCESS
            }
            Some(None) => codes::ERR_TOPOLOGY,
            None => codes::ERR_COMM,
        }
    }

    fn type_contiguous(&self, count: i32, oldtype: RawDatatype, newtype: &mut RawDatatype) -> ReturnCode {
        let mut state = self.state.lock();
        let size = match state.bytes_for(count, oldtype) {
            Ok(size) => size,
            Err(code) => return code,
        };
        let datatype = RawDatatype(state.allocate());
        state.types.insert(datatype, (size, false));
        *newtype = datatype;
        codes::SUCCESS
    }

    fn type_commit(&self, datatype: &mut RawDatatype) -> ReturnCode {
        match self.state.lock().types.get_mut(datatype) {
            Some((_, committed)) => {
                *committed = true;
                codes::SUCCESS
            }
            None if datatype.predefined_size().is_some() => codes::SUCCESS,
            None => codes::ERR_TYPE,
        }
    }

    fn type_size(&self, datatype: RawDatatype, size: &mut i32) -> ReturnCode {
        let state = self.state.lock();
        let bytes = datatype
            .predefined_size()
            .or_else(|| state.types.get(&datatype).map(|(size, _)| *size));
        match bytes {
            Some(bytes) => {
                *size = bytes as i32;
                codes::SUCCESS
            }
            None => codes::ERR_TYPE,
        }
    }

    fn type_free(&self, datatype: &mut RawDatatype) -> ReturnCode {
        if self.state.lock().types.remove(datatype).is_none() {
            return codes::ERR_TYPE;
        }
        *datatype = RawDatatype::NULL;
        codes::SUCCESS
    }

    fn op_create(&self, _function: UserFunction, _commute: bool, op: &mut RawOp) -> ReturnCode {
        let mut state = self.state.lock();
        let created = RawOp(state.allocate());
        state.ops.insert(created);
        *op = created;
        codes::SUCCESS
    }

    fn op_free(&self, op: &mut RawOp) -> ReturnCode {
        if !self.state.lock().ops.remove(op) {
            return codes::ERR_OP;
        }
        *op = RawOp::NULL;
        codes::SUCCESS
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
        self.issue(request, |state| {
            if !state.comm_valid(comm) {
                return Err(codes::ERR_COMM);
            }
            if tag < 0 {
                return Err(codes::ERR_TAG);
            }
            let bytes = state.bytes_for(count, datatype)?;
            if buf.len() < bytes {
                return Err(codes::ERR_BUFFER);
            }
            match dest {
                0 => state.messages.push_back(Message {
                    comm,
                    tag,
                    data: buf[..bytes].to_vec(),
                }),
                PROC_NULL => {}
                _ => return Err(codes::ERR_RANK),
            }
            Ok(state.ready(None))
        })
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
        self.issue(request, |state| {
            if !state.comm_valid(comm) {
                return Err(codes::ERR_COMM);
            }
            if source != 0 && source != ANY_SOURCE {
                return Err(codes::ERR_RANK);
            }
            let capacity = state.bytes_for(count, datatype)?;
            Ok(state.start(Outcome::Receive { comm, tag, capacity }))
        })
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
        self.issue(request, |state| {
            if !state.comm_valid(comm) {
                return Err(codes::ERR_COMM);
            }
            if !state.op_valid(op) {
                return Err(codes::ERR_OP);
            }
            let bytes = state.bytes_for(count, datatype)?;
            if sendbuf.len() < bytes {
                return Err(codes::ERR_BUFFER);
            }
            Ok(state.ready(Some(sendbuf[..bytes].to_vec())))
        })
    }

    fn ibarrier(&self, comm: RawComm, request: &mut RawRequest) -> ReturnCode {
        self.issue(request, |state| {
            if !state.comm_valid(comm) {
                return Err(codes::ERR_COMM);
            }
            Ok(state.ready(None))
        })
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
        self.issue(request, |state| {
            if !state.comm_valid(comm) {
                return Err(codes::ERR_COMM);
            }
            if root != 0 {
                return Err(codes::ERR_ROOT);
            }
            let bytes = state.bytes_for(count, datatype)?;
            if buf.len() < bytes {
                return Err(codes::ERR_BUFFER);
            }
            Ok(state.ready(Some(buf[..bytes].to_vec())))
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
        self.issue(request, |state| {
            if !state.comm_valid(comm) {
                return Err(codes::ERR_COMM);
            }
            if root != 0 {
                return Err(codes::ERR_ROOT);
            }
            if sendcount != recvcount {
                return Err(codes::ERR_COUNT);
            }
            let bytes = state.bytes_for(sendcount, datatype)?;
            if sendbuf.len() < bytes {
                return Err(codes::ERR_BUFFER);
            }
            Ok(state.ready(Some(sendbuf[..bytes].to_vec())))
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
        self.issue(request, |state| {
            if !state.comm_valid(comm) {
                return Err(codes::ERR_COMM);
            }
            if root != 0 {
                return Err(codes::ERR_ROOT);
            }
            let (Some(&recvcount), Some(&displ)) = (recvcounts.first(), displs.first()) else {
                return Err(codes::ERR_ARG);
            };
            if sendcount > recvcount || displ < 0 {
                return Err(codes::ERR_COUNT);
            }
            let bytes = state.bytes_for(sendcount, datatype)?;
            let offset = state.bytes_for(displ, datatype)?;
            if sendbuf.len() < bytes || recvbuf.len() < offset + bytes {
                return Err(codes::ERR_BUFFER);
            }
            let mut gathered = recvbuf.to_vec();
            gathered[offset..offset + bytes].copy_from_slice(&sendbuf[..bytes]);
            Ok(state.ready(Some(gathered)))
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
        self.issue(request, |state| {
            if !state.comm_valid(comm) {
                return Err(codes::ERR_COMM);
            }
            if root != 0 {
                return Err(codes::ERR_ROOT);
            }
            let (Some(&sendcount), Some(&displ)) = (sendcounts.first(), displs.first()) else {
                return Err(codes::ERR_ARG);
            };
            if sendcount > recvcount || displ < 0 {
                return Err(codes::ERR_TRUNCATE);
            }
            let bytes = state.bytes_for(sendcount, datatype)?;
            let offset = state.bytes_for(displ, datatype)?;
            if sendbuf.len() < offset + bytes {
                return Err(codes::ERR_BUFFER);
            }
            Ok(state.ready(Some(sendbuf[offset..offset + bytes].to_vec())))
        })
    }

    fn exscan(
        &self,
        sendbuf: &[u8],
        _recvbuf: &mut [u8],
        count: i32,
        datatype: RawDatatype,
        op: RawOp,
        comm: RawComm,
    ) -> ReturnCode {
        let state = self.state.lock();
        if !state.comm_valid(comm) {
            return codes::ERR_COMM;
        }
        if !state.op_valid(op) {
            return codes::ERR_OP;
        }
        match state.bytes_for(count, datatype) {
            Ok(bytes) if sendbuf.len() >= bytes => codes::SUCCESS,
            Ok(_) => codes::ERR_BUFFER,
            Err(code) => code,
        }
    }

    fn wait(&self, request: &mut RawRequest, completion: &mut Completion) -> ReturnCode {
        if request.is_null() {
            *completion = Completion::default();
            return codes::SUCCESS;
        }
        let mut state = self.state.lock();
        if !state.requests.contains_key(request) {
            return codes::ERR_REQUEST;
        }
        match state.resolve(*request) {
            Some(Ok(done)) => {
                *completion = done;
                *request = RawRequest::NULL;
                codes::SUCCESS
            }
            Some(Err(code)) => {
                *request = RawRequest::NULL;
                code
            }
            // A lone participant waiting for a message nobody will send.
            None => codes::ERR_PENDING,
        }
    }

    fn test(&self, request: &mut RawRequest, flag: &mut bool, completion: &mut Completion) -> ReturnCode {
        if request.is_null() {
            *flag = true;
            *completion = Completion::default();
            return codes::SUCCESS;
        }
        let mut state = self.state.lock();
        let Some(pending) = state.requests.get_mut(request) else {
            return codes::ERR_REQUEST;
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            *flag = false;
            return codes::SUCCESS;
        }
        match state.resolve(*request) {
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
            let mut state = self.state.lock();
            let mut all_ready = true;
            for request in requests.iter() {
                if let Some(pending) = state.requests.get_mut(request) {
                    if pending.polls_left > 0 {
                        pending.polls_left -= 1;
                        all_ready = false;
                    }
                }
            }
            if !all_ready {
                *flag = false;
                return codes::SUCCESS;
            }
        }
        *flag = true;
        self.waitall(requests, completions)
    }
}
