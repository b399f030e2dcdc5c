//! Shared state of an in-process universe.
//!
//! All participants of a universe share one [`State`] behind a mutex, plus a
//! condition variable that is signalled whenever anything changes. Nothing
//! runs in the background: sends are eager, so a message is matched against
//! the destination's posted receives when it is sent, and a collective is
//! settled by whichever participant contributes last. Waiting is therefore
//! only ever waiting for another participant to reach a call.
//!
//! Collectives are matched by order of issue: the `n`-th collective a
//! participant starts on a communicator joins the `n`-th collective of every
//! other member.

use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;
use std::sync::Arc;

use parcomm::native::{
    codes, split_type, Completion, RawComm, RawDatatype, RawOp, RawRequest, RawStatus, ReturnCode,
    UserFunction, ANY_SOURCE, ANY_TAG, PROC_NULL, UNDEFINED,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::config::UniverseConfig;
use crate::reduce::Reducer;

/// Result of a substrate operation: a value or a native status code.
pub(crate) type Outcome<T> = Result<T, ReturnCode>;

const FIRST_HANDLE: u64 = 0x1000;

/// Arguments of the library prefixed with this are consumed by `init`.
pub(crate) const ARG_PREFIX: &str = "--parcomm-";

/// Identity of a communication context, used to keep traffic on different
/// communicators apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Context {
    World,
    Solo(usize),
    Derived(RawComm),
}

/// Cartesian grid attached to a communicator. Ranks are laid out row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Cartesian {
    pub(crate) dims: Vec<i32>,
    pub(crate) periods: Vec<bool>,
}

impl Cartesian {
    /// Number of cells in the grid, or `None` if it does not fit in memory.
    fn cells(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |cells, &dim| cells.checked_mul(usize::try_from(dim).ok()?))
    }

    pub(crate) fn coords_of(&self, rank: usize) -> Vec<i32> {
        let mut coords = vec![0; self.dims.len()];
        let mut rest = rank;
        for (coord, &dim) in coords.iter_mut().zip(&self.dims).rev() {
            let dim = dim as usize;
            *coord = (rest % dim) as i32;
            rest /= dim;
        }
        coords
    }

    pub(crate) fn rank_of(&self, coords: &[i32]) -> Outcome<usize> {
        if coords.len() != self.dims.len() {
            return Err(codes::ERR_ARG);
        }
        let mut rank = 0usize;
        for ((&coord, &dim), &periodic) in coords.iter().zip(&self.dims).zip(&self.periods) {
            let coord = if periodic {
                coord.rem_euclid(dim)
            } else if (0..dim).contains(&coord) {
                coord
            } else {
                return Err(codes::ERR_ARG);
            };
            rank = rank * dim as usize + coord as usize;
        }
        Ok(rank)
    }
}

/// A communicator as seen by one member.
#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub(crate) context: Context,
    /// World ranks of the members, indexed by rank in the communicator.
    pub(crate) members: Arc<[usize]>,
    pub(crate) rank: usize,
    pub(crate) cartesian: Option<Cartesian>,
}

impl Group {
    pub(crate) fn size(&self) -> usize {
        self.members.len()
    }

    fn rank_arg(&self, rank: i32, code: ReturnCode) -> Outcome<usize> {
        usize::try_from(rank)
            .ok()
            .filter(|&rank| rank < self.size())
            .ok_or(code)
    }
}

/// Number and kind of predefined elements a `(count, datatype)` pair covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    base: RawDatatype,
    elements: usize,
    element_size: usize,
}

impl Layout {
    pub(crate) const fn bytes(&self) -> usize {
        self.elements * self.element_size
    }
}

#[derive(Debug)]
struct CommRecord {
    members: Arc<[usize]>,
    holders: HashSet<usize>,
    cartesian: Option<Cartesian>,
}

#[derive(Debug)]
struct TypeRecord {
    owner: usize,
    base: RawDatatype,
    multiplicity: usize,
    committed: bool,
}

struct OpRecord {
    owner: usize,
    function: UserFunction,
}

#[derive(Debug)]
struct Message {
    context: Context,
    source: usize,
    tag: i32,
    data: Vec<u8>,
}

#[derive(Debug)]
struct PostedReceive {
    context: Context,
    source: i32,
    tag: i32,
    capacity: usize,
}

impl PostedReceive {
    fn accepts(&self, message: &Message) -> bool {
        self.context == message.context
            && (self.source == ANY_SOURCE || usize::try_from(self.source) == Ok(message.source))
            && (self.tag == ANY_TAG || self.tag == message.tag)
    }

    fn complete(&self, message: Message) -> Outcome<Completion> {
        if message.data.len() > self.capacity {
            return Err(codes::ERR_TRUNCATE);
        }
        Ok(Completion {
            status: RawStatus {
                source: message.source as i32,
                tag: message.tag,
                error: codes::SUCCESS,
            },
            data: Some(message.data),
        })
    }
}

#[derive(Debug, Default)]
struct Participant {
    initialized: bool,
    finalized: bool,
    /// Messages no posted receive has matched yet, in arrival order.
    mailbox: VecDeque<Message>,
    /// Receives still waiting for a message, in posting order.
    posted: VecDeque<RawRequest>,
}

#[derive(Debug)]
enum Progress {
    Done(Outcome<Completion>),
    Receive(PostedReceive),
    Collective { key: CollectiveKey, rank: usize },
}

#[derive(Debug)]
struct RequestRecord {
    owner: usize,
    progress: Progress,
}

type CollectiveKey = (Context, u64);

/// What one participant produced for its part of a collective.
#[derive(Debug, Clone, Default)]
pub(crate) struct Delivery {
    pub(crate) data: Option<Vec<u8>>,
    pub(crate) comm: RawComm,
}

pub(crate) struct Bcast {
    root: usize,
    data: Vec<u8>,
}

pub(crate) struct Reduction {
    layout: Layout,
    reducer: Reducer,
    data: Vec<u8>,
}

pub(crate) struct Gather {
    root: usize,
    data: Vec<u8>,
    recv_bytes: usize,
}

pub(crate) struct Gatherv {
    root: usize,
    data: Vec<u8>,
    recvbuf: Vec<u8>,
    counts: Vec<usize>,
    displs: Vec<usize>,
}

pub(crate) struct Scatterv {
    root: usize,
    data: Vec<u8>,
    counts: Vec<usize>,
    displs: Vec<usize>,
    capacity: usize,
}

pub(crate) struct Split {
    color: i32,
    key: i32,
}

pub(crate) enum Contribution {
    Barrier,
    Bcast(Bcast),
    Allreduce(Reduction),
    Exscan(Reduction),
    Gather(Gather),
    Gatherv(Gatherv),
    Scatterv(Scatterv),
    Dup(Option<Cartesian>),
    Split(Split),
    Cart(Cartesian),
}

struct Collective {
    members: Arc<[usize]>,
    contributions: Vec<Option<Contribution>>,
    outputs: Option<Vec<Option<Outcome<Delivery>>>>,
}

/// Everything a universe knows, guarded by [`Shared`].
pub(crate) struct State {
    config: UniverseConfig,
    world: Arc<[usize]>,
    next_handle: u64,
    aborted: bool,
    participants: Vec<Participant>,
    comms: HashMap<RawComm, CommRecord>,
    types: HashMap<RawDatatype, TypeRecord>,
    ops: HashMap<RawOp, OpRecord>,
    requests: HashMap<RawRequest, RequestRecord>,
    sequences: HashMap<(Context, usize), u64>,
    collectives: HashMap<CollectiveKey, Collective>,
}

/// The lock and the wake-up signal of a universe.
pub(crate) struct Shared {
    state: Mutex<State>,
    progress: Condvar,
}

impl Shared {
    pub(crate) fn new(config: UniverseConfig) -> Self {
        Self {
            state: Mutex::new(State::new(config)),
            progress: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Wake every participant blocked in [`Shared::block_until`].
    pub(crate) fn notify(&self) {
        self.progress.notify_all();
    }

    /// Re-run `poll` after every state change until it yields a result.
    ///
    /// Returns `ERR_INTERN` once another participant of the universe has
    /// panicked, since whatever was awaited may never arrive.
    pub(crate) fn block_until<T>(
        &self,
        state: &mut MutexGuard<'_, State>,
        mut poll: impl FnMut(&mut State) -> Option<Outcome<T>>,
    ) -> Outcome<T> {
        loop {
            if let Some(outcome) = poll(state) {
                return outcome;
            }
            if state.aborted {
                return Err(codes::ERR_INTERN);
            }
            self.progress.wait(state);
        }
    }

    /// Mark the universe as broken and wake everyone up.
    pub(crate) fn abort(&self) {
        self.lock().aborted = true;
        self.notify();
    }
}

impl State {
    fn new(config: UniverseConfig) -> Self {
        let size = config.world_size();
        Self {
            config,
            world: (0..size).collect(),
            next_handle: FIRST_HANDLE,
            aborted: false,
            participants: (0..size).map(|_| Participant::default()).collect(),
            comms: HashMap::new(),
            types: HashMap::new(),
            ops: HashMap::new(),
            requests: HashMap::new(),
            sequences: HashMap::new(),
            collectives: HashMap::new(),
        }
    }

    fn allocate(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Derived communicators, datatypes and operators not yet freed.
    pub(crate) fn live_handles(&self) -> usize {
        self.comms.len() + self.types.len() + self.ops.len()
    }

    /// Requests not yet completed by their owner.
    pub(crate) fn outstanding_requests(&self) -> usize {
        self.requests.len()
    }

    // Bring-up and tear-down.

    pub(crate) fn is_initialized(&self, me: usize) -> bool {
        self.participants[me].initialized
    }

    pub(crate) fn is_finalized(&self, me: usize) -> bool {
        self.participants[me].finalized
    }

    pub(crate) fn init(&mut self, me: usize, args: &mut Vec<String>) -> Outcome<()> {
        let participant = &mut self.participants[me];
        if participant.initialized {
            return Err(codes::ERR_OTHER);
        }
        participant.initialized = true;
        args.retain(|arg| !arg.starts_with(ARG_PREFIX));
        debug!(rank = me, "participant initialized");
        Ok(())
    }

    pub(crate) fn finalize(&mut self, me: usize) -> Outcome<()> {
        self.check_active(me)?;
        self.participants[me].finalized = true;
        debug!(rank = me, "participant finalized");
        Ok(())
    }

    /// Everything but bring-up queries requires an initialized, not yet
    /// finalized participant.
    pub(crate) fn check_active(&self, me: usize) -> Outcome<()> {
        let participant = &self.participants[me];
        if participant.initialized && !participant.finalized {
            Ok(())
        } else {
            Err(codes::ERR_OTHER)
        }
    }

    // Communicators.

    pub(crate) fn group(&self, comm: RawComm, me: usize) -> Outcome<Group> {
        match comm {
            RawComm::WORLD => Ok(Group {
                context: Context::World,
                members: Arc::clone(&self.world),
                rank: me,
                cartesian: None,
            }),
            RawComm::SELF => Ok(Group {
                context: Context::Solo(me),
                members: Arc::from([me]),
                rank: 0,
                cartesian: None,
            }),
            _ => {
                let record = self.comms.get(&comm).filter(|record| record.holders.contains(&me));
                let record = record.ok_or(codes::ERR_COMM)?;
                let rank = record
                    .members
                    .iter()
                    .position(|&member| member == me)
                    .ok_or(codes::ERR_COMM)?;
                Ok(Group {
                    context: Context::Derived(comm),
                    members: Arc::clone(&record.members),
                    rank,
                    cartesian: record.cartesian.clone(),
                })
            }
        }
    }

    fn register_comm(&mut self, members: Vec<usize>, cartesian: Option<Cartesian>) -> RawComm {
        let comm = RawComm(self.allocate());
        debug!(?comm, ?members, cartesian = cartesian.is_some(), "created communicator");
        self.comms.insert(
            comm,
            CommRecord {
                holders: members.iter().copied().collect(),
                members: members.into(),
                cartesian,
            },
        );
        comm
    }

    pub(crate) fn comm_free(&mut self, me: usize, comm: &mut RawComm) -> Outcome<()> {
        let record = self.comms.get_mut(comm).ok_or(codes::ERR_COMM)?;
        if !record.holders.remove(&me) {
            return Err(codes::ERR_COMM);
        }
        if record.holders.is_empty() {
            self.comms.remove(comm);
            let context = Context::Derived(*comm);
            self.sequences.retain(|(used, _), _| *used != context);
            debug!(comm = ?*comm, "released communicator");
        }
        *comm = RawComm::NULL;
        Ok(())
    }

    pub(crate) fn split_color(&self, me: usize, kind: i32) -> Outcome<i32> {
        match kind {
            split_type::SHARED => Ok(self.config.node_of(me) as i32),
            UNDEFINED => Ok(UNDEFINED),
            _ => Err(codes::ERR_ARG),
        }
    }

    // Datatypes and operators.

    pub(crate) fn layout(&self, me: usize, count: i32, datatype: RawDatatype) -> Outcome<Layout> {
        let count = usize::try_from(count).map_err(|_| codes::ERR_COUNT)?;
        if let Some(element_size) = datatype.predefined_size() {
            return Ok(Layout {
                base: datatype,
                elements: count,
                element_size,
            });
        }
        let record = self.types.get(&datatype).filter(|record| record.owner == me);
        let record = record.filter(|record| record.committed).ok_or(codes::ERR_TYPE)?;
        Ok(Layout {
            base: record.base,
            elements: count * record.multiplicity,
            element_size: record.base.predefined_size().ok_or(codes::ERR_TYPE)?,
        })
    }

    pub(crate) fn type_contiguous(&mut self, me: usize, count: i32, oldtype: RawDatatype) -> Outcome<RawDatatype> {
        let count = usize::try_from(count).map_err(|_| codes::ERR_COUNT)?;
        let (base, multiplicity) = if oldtype.predefined_size().is_some() {
            (oldtype, 1)
        } else {
            let record = self.types.get(&oldtype).filter(|record| record.owner == me);
            let record = record.ok_or(codes::ERR_TYPE)?;
            (record.base, record.multiplicity)
        };
        let datatype = RawDatatype(self.allocate());
        self.types.insert(
            datatype,
            TypeRecord {
                owner: me,
                base,
                multiplicity: multiplicity * count,
                committed: false,
            },
        );
        Ok(datatype)
    }

    pub(crate) fn type_commit(&mut self, me: usize, datatype: RawDatatype) -> Outcome<()> {
        if datatype.predefined_size().is_some() {
            return Ok(());
        }
        let record = self.types.get_mut(&datatype).filter(|record| record.owner == me);
        record.ok_or(codes::ERR_TYPE)?.committed = true;
        Ok(())
    }

    pub(crate) fn type_size(&self, me: usize, datatype: RawDatatype) -> Outcome<usize> {
        if let Some(size) = datatype.predefined_size() {
            return Ok(size);
        }
        let record = self.types.get(&datatype).filter(|record| record.owner == me);
        let record = record.ok_or(codes::ERR_TYPE)?;
        Ok(record.multiplicity * record.base.predefined_size().ok_or(codes::ERR_TYPE)?)
    }

    pub(crate) fn type_free(&mut self, me: usize, datatype: &mut RawDatatype) -> Outcome<()> {
        match self.types.get(datatype) {
            Some(record) if record.owner == me => {
                self.types.remove(datatype);
                *datatype = RawDatatype::NULL;
                Ok(())
            }
            _ => Err(codes::ERR_TYPE),
        }
    }

    pub(crate) fn op_create(&mut self, me: usize, function: UserFunction) -> RawOp {
        let op = RawOp(self.allocate());
        self.ops.insert(op, OpRecord { owner: me, function });
        op
    }

    pub(crate) fn op_free(&mut self, me: usize, op: &mut RawOp) -> Outcome<()> {
        match self.ops.get(op) {
            Some(record) if record.owner == me => {
                self.ops.remove(op);
                *op = RawOp::NULL;
                Ok(())
            }
            _ => Err(codes::ERR_OP),
        }
    }

    fn reducer(&self, me: usize, op: RawOp) -> Outcome<Reducer> {
        if (RawOp::SUM.0..=RawOp::LAND.0).contains(&op.0) {
            return Ok(Reducer::Predefined(op));
        }
        self.ops
            .get(&op)
            .filter(|record| record.owner == me)
            .map(|record| Reducer::User(Arc::clone(&record.function)))
            .ok_or(codes::ERR_OP)
    }

    // Requests.

    fn register_request(&mut self, me: usize, progress: Progress) -> RawRequest {
        let request = RawRequest(self.allocate());
        self.requests.insert(request, RequestRecord { owner: me, progress });
        request
    }

    fn finished(&mut self, me: usize, outcome: Outcome<Completion>) -> RawRequest {
        self.register_request(me, Progress::Done(outcome))
    }

    pub(crate) fn check_request(&self, me: usize, request: RawRequest) -> Outcome<()> {
        match self.requests.get(&request) {
            Some(record) if record.owner == me => Ok(()),
            _ => Err(codes::ERR_REQUEST),
        }
    }

    /// Whether `request` would complete if polled now.
    pub(crate) fn is_ready(&self, request: RawRequest) -> bool {
        match self.requests.get(&request).map(|record| &record.progress) {
            Some(Progress::Done(_)) | None => true,
            Some(Progress::Receive(_)) => false,
            Some(Progress::Collective { key, rank }) => self
                .collectives
                .get(key)
                .and_then(|collective| collective.outputs.as_ref())
                .is_some_and(|outputs| outputs[*rank].is_some()),
        }
    }

    /// Complete `request` if its operation has finished.
    pub(crate) fn poll(&mut self, request: RawRequest) -> Option<Outcome<Completion>> {
        let Some(record) = self.requests.get(&request) else {
            return Some(Err(codes::ERR_REQUEST));
        };
        match record.progress {
            Progress::Receive(_) => None,
            Progress::Done(_) => match self.requests.remove(&request).map(|record| record.progress) {
                Some(Progress::Done(outcome)) => Some(outcome),
                _ => Some(Err(codes::ERR_INTERN)),
            },
            Progress::Collective { key, rank } => {
                let delivery = self.collect(key, rank)?;
                self.requests.remove(&request);
                Some(delivery.map(|delivery| Completion {
                    status: RawStatus {
                        source: rank as i32,
                        tag: ANY_TAG,
                        error: codes::SUCCESS,
                    },
                    data: delivery.data,
                }))
            }
        }
    }

    // Point-to-point.

    pub(crate) fn isend(
        &mut self,
        me: usize,
        buf: &[u8],
        layout: Layout,
        dest: i32,
        tag: i32,
        group: &Group,
    ) -> Outcome<RawRequest> {
        if tag < 0 {
            return Err(codes::ERR_TAG);
        }
        let bytes = layout.bytes();
        if buf.len() < bytes {
            return Err(codes::ERR_BUFFER);
        }
        if dest != PROC_NULL {
            let target = group.members[group.rank_arg(dest, codes::ERR_RANK)?];
            self.deliver(
                target,
                Message {
                    context: group.context,
                    source: group.rank,
                    tag,
                    data: buf[..bytes].to_vec(),
                },
            );
        }
        let status = RawStatus {
            source: group.rank as i32,
            tag,
            error: codes::SUCCESS,
        };
        Ok(self.finished(me, Ok(Completion { status, data: None })))
    }

    /// Hand a message to the earliest matching posted receive of `target`,
    /// or queue it.
    fn deliver(&mut self, target: usize, message: Message) {
        let requests = &self.requests;
        let matched = self.participants[target].posted.iter().position(|request| {
            matches!(
                requests.get(request).map(|record| &record.progress),
                Some(Progress::Receive(receive)) if receive.accepts(&message)
            )
        });
        let Some(request) = matched.and_then(|position| self.participants[target].posted.remove(position)) else {
            trace!(target, tag = message.tag, "queued message");
            self.participants[target].mailbox.push_back(message);
            return;
        };
        if let Some(record) = self.requests.get_mut(&request) {
            if let Progress::Receive(receive) = &record.progress {
                trace!(target, tag = message.tag, ?request, "matched posted receive");
                record.progress = Progress::Done(receive.complete(message));
            }
        }
    }

    pub(crate) fn irecv(
        &mut self,
        me: usize,
        layout: Layout,
        source: i32,
        tag: i32,
        group: &Group,
    ) -> Outcome<RawRequest> {
        if tag < 0 && tag != ANY_TAG {
            return Err(codes::ERR_TAG);
        }
        if source == PROC_NULL {
            let status = RawStatus {
                source: PROC_NULL,
                tag: ANY_TAG,
                error: codes::SUCCESS,
            };
            return Ok(self.finished(me, Ok(Completion { status, data: None })));
        }
        if source != ANY_SOURCE {
            group.rank_arg(source, codes::ERR_RANK)?;
        }
        let receive = PostedReceive {
            context: group.context,
            source,
            tag,
            capacity: layout.bytes(),
        };
        let mailbox = &mut self.participants[me].mailbox;
        let queued = mailbox
            .iter()
            .position(|message| receive.accepts(message))
            .and_then(|position| mailbox.remove(position));
        if let Some(message) = queued {
            let outcome = receive.complete(message);
            return Ok(self.finished(me, outcome));
        }
        let request = self.register_request(me, Progress::Receive(receive));
        self.participants[me].posted.push_back(request);
        Ok(request)
    }

    // Collectives.

    pub(crate) fn start_collective(&mut self, me: usize, group: &Group, contribution: Contribution) -> Outcome<RawRequest> {
        let key = self.contribute(me, group, contribution)?;
        Ok(self.register_request(me, Progress::Collective { key, rank: group.rank }))
    }

    /// Add this participant's part to its next collective on `group`.
    pub(crate) fn contribute(&mut self, me: usize, group: &Group, contribution: Contribution) -> Outcome<CollectiveKey> {
        let sequence = self.sequences.entry((group.context, me)).or_insert(0);
        let key = (group.context, *sequence);
        let collective = self.collectives.entry(key).or_insert_with(|| Collective {
            members: Arc::clone(&group.members),
            contributions: (0..group.size()).map(|_| None).collect(),
            outputs: None,
        });
        let mismatched = collective
            .contributions
            .iter()
            .flatten()
            .next()
            .is_some_and(|existing| mem::discriminant(existing) != mem::discriminant(&contribution));
        if mismatched {
            return Err(codes::ERR_OTHER);
        }
        collective.contributions[group.rank] = Some(contribution);
        *sequence += 1;
        trace!(context = ?group.context, sequence = key.1, rank = group.rank, "joined collective");

        if collective.contributions.iter().all(Option::is_some) {
            let members = Arc::clone(&collective.members);
            let contributions: Vec<Contribution> = mem::take(&mut collective.contributions).into_iter().flatten().collect();
            let outputs = self.settle(&members, contributions);
            if let Some(collective) = self.collectives.get_mut(&key) {
                collective.outputs = Some(outputs.into_iter().map(Some).collect());
            }
        }
        Ok(key)
    }

    /// Take member `rank`'s output of a settled collective.
    pub(crate) fn collect(&mut self, key: CollectiveKey, rank: usize) -> Option<Outcome<Delivery>> {
        let Some(collective) = self.collectives.get_mut(&key) else {
            return Some(Err(codes::ERR_INTERN));
        };
        let outputs = collective.outputs.as_mut()?;
        let output = outputs.get_mut(rank)?.take()?;
        if outputs.iter().all(Option::is_none) {
            self.collectives.remove(&key);
        }
        Some(output)
    }

    fn settle(&mut self, members: &[usize], contributions: Vec<Contribution>) -> Vec<Outcome<Delivery>> {
        let size = contributions.len();
        let settled = match contributions.first() {
            None => Ok(Vec::new()),
            Some(Contribution::Barrier) => Ok(vec![Ok(Delivery::default()); size]),
            Some(Contribution::Bcast(_)) => parts(contributions, |part| match part {
                Contribution::Bcast(bcast) => Some(bcast),
                _ => None,
            })
            .map(|parts| settle_bcast(&parts)),
            Some(Contribution::Allreduce(_)) => parts(contributions, |part| match part {
                Contribution::Allreduce(reduction) => Some(reduction),
                _ => None,
            })
            .and_then(|parts| settle_allreduce(&parts)),
            Some(Contribution::Exscan(_)) => parts(contributions, |part| match part {
                Contribution::Exscan(reduction) => Some(reduction),
                _ => None,
            })
            .and_then(|parts| settle_exscan(&parts)),
            Some(Contribution::Gather(_)) => parts(contributions, |part| match part {
                Contribution::Gather(gather) => Some(gather),
                _ => None,
            })
            .map(|parts| settle_gather(&parts)),
            Some(Contribution::Gatherv(_)) => parts(contributions, |part| match part {
                Contribution::Gatherv(gatherv) => Some(gatherv),
                _ => None,
            })
            .map(|parts| settle_gatherv(&parts)),
            Some(Contribution::Scatterv(_)) => parts(contributions, |part| match part {
                Contribution::Scatterv(scatterv) => Some(scatterv),
                _ => None,
            })
            .map(|parts| settle_scatterv(&parts)),
            Some(Contribution::Dup(cartesian)) => {
                let comm = self.register_comm(members.to_vec(), cartesian.clone());
                Ok(vec![Ok(Delivery { data: None, comm }); size])
            }
            Some(Contribution::Split(_)) => parts(contributions, |part| match part {
                Contribution::Split(split) => Some(split),
                _ => None,
            })
            .map(|parts| self.settle_split(members, &parts)),
            Some(Contribution::Cart(_)) => parts(contributions, |part| match part {
                Contribution::Cart(cartesian) => Some(cartesian),
                _ => None,
            })
            .map(|parts| self.settle_cart(members, &parts)),
        };
        settled.unwrap_or_else(|code| vec![Err(code); size])
    }

    fn settle_split(&mut self, members: &[usize], parts: &[Split]) -> Vec<Outcome<Delivery>> {
        let mut outputs = vec![Ok(Delivery::default()); parts.len()];
        let mut colors: Vec<i32> = parts.iter().map(|part| part.color).filter(|&color| color != UNDEFINED).collect();
        colors.sort_unstable();
        colors.dedup();
        for color in colors {
            let mut ranks: Vec<usize> = (0..parts.len()).filter(|&rank| parts[rank].color == color).collect();
            ranks.sort_by_key(|&rank| (parts[rank].key, rank));
            let comm = self.register_comm(ranks.iter().map(|&rank| members[rank]).collect(), None);
            for rank in ranks {
                outputs[rank] = Ok(Delivery { data: None, comm });
            }
        }
        outputs
    }

    fn settle_cart(&mut self, members: &[usize], parts: &[Cartesian]) -> Vec<Outcome<Delivery>> {
        let grid = &parts[0];
        if parts.iter().any(|part| part != grid) {
            return vec![Err(codes::ERR_DIMS); parts.len()];
        }
        let Some(cells) = grid.cells() else {
            return vec![Err(codes::ERR_DIMS); parts.len()];
        };
        let comm = self.register_comm(members[..cells].to_vec(), Some(grid.clone()));
        (0..parts.len())
            .map(|rank| {
                let comm = if rank < cells { comm } else { RawComm::NULL };
                Ok(Delivery { data: None, comm })
            })
            .collect()
    }

    // Builders for contributions, validated against the caller's arguments.

    pub(crate) fn bcast(&self, group: &Group, root: i32, data: Vec<u8>) -> Outcome<Contribution> {
        let root = group.rank_arg(root, codes::ERR_ROOT)?;
        Ok(Contribution::Bcast(Bcast { root, data }))
    }

    pub(crate) fn reduction(&self, me: usize, layout: Layout, op: RawOp, data: &[u8]) -> Outcome<Reduction> {
        if data.len() < layout.bytes() {
            return Err(codes::ERR_BUFFER);
        }
        Ok(Reduction {
            layout,
            reducer: self.reducer(me, op)?,
            data: data[..layout.bytes()].to_vec(),
        })
    }

    pub(crate) fn gather(&self, group: &Group, root: i32, data: Vec<u8>, recv_bytes: usize) -> Outcome<Contribution> {
        let root = group.rank_arg(root, codes::ERR_ROOT)?;
        Ok(Contribution::Gather(Gather { root, data, recv_bytes }))
    }

    pub(crate) fn gatherv(
        &self,
        group: &Group,
        root: i32,
        data: Vec<u8>,
        recvbuf: &[u8],
        counts: &[i32],
        displs: &[i32],
        unit: usize,
    ) -> Outcome<Contribution> {
        let root = group.rank_arg(root, codes::ERR_ROOT)?;
        let (counts, displs) = if group.rank == root {
            (scaled(counts, unit, group.size())?, scaled(displs, unit, group.size())?)
        } else {
            (Vec::new(), Vec::new())
        };
        Ok(Contribution::Gatherv(Gatherv {
            root,
            data,
            recvbuf: recvbuf.to_vec(),
            counts,
            displs,
        }))
    }

    pub(crate) fn scatterv(
        &self,
        group: &Group,
        root: i32,
        data: &[u8],
        counts: &[i32],
        displs: &[i32],
        unit: usize,
        capacity: usize,
    ) -> Outcome<Contribution> {
        let root = group.rank_arg(root, codes::ERR_ROOT)?;
        let (data, counts, displs) = if group.rank == root {
            (data.to_vec(), scaled(counts, unit, group.size())?, scaled(displs, unit, group.size())?)
        } else {
            (Vec::new(), Vec::new(), Vec::new())
        };
        Ok(Contribution::Scatterv(Scatterv {
            root,
            data,
            counts,
            displs,
            capacity,
        }))
    }

    pub(crate) fn cart(&self, group: &Group, dims: &[i32], periods: &[bool]) -> Outcome<Contribution> {
        if dims.is_empty() || dims.len() != periods.len() || dims.iter().any(|&dim| dim < 1) {
            return Err(codes::ERR_DIMS);
        }
        let grid = Cartesian {
            dims: dims.to_vec(),
            periods: periods.to_vec(),
        };
        if grid.cells().ok_or(codes::ERR_DIMS)? > group.size() {
            return Err(codes::ERR_TOPOLOGY);
        }
        Ok(Contribution::Cart(grid))
    }
}

impl Contribution {
    pub(crate) const fn barrier() -> Self {
        Self::Barrier
    }

    pub(crate) fn dup(group: &Group) -> Self {
        Self::Dup(group.cartesian.clone())
    }

    pub(crate) fn split(color: i32, key: i32) -> Outcome<Self> {
        if color < 0 && color != UNDEFINED {
            return Err(codes::ERR_ARG);
        }
        Ok(Self::Split(Split { color, key }))
    }

    pub(crate) const fn allreduce(reduction: Reduction) -> Self {
        Self::Allreduce(reduction)
    }

    pub(crate) const fn exscan(reduction: Reduction) -> Self {
        Self::Exscan(reduction)
    }
}

/// Per-rank counts or displacements in elements, converted to bytes.
fn scaled(values: &[i32], unit: usize, size: usize) -> Outcome<Vec<usize>> {
    if values.len() != size {
        return Err(codes::ERR_ARG);
    }
    values
        .iter()
        .map(|&value| usize::try_from(value).map(|value| value * unit).map_err(|_| codes::ERR_COUNT))
        .collect()
}

/// Unwrap the contributions of one collective, all of the same kind.
fn parts<T>(contributions: Vec<Contribution>, pick: impl Fn(Contribution) -> Option<T>) -> Outcome<Vec<T>> {
    contributions
        .into_iter()
        .map(|contribution| pick(contribution).ok_or(codes::ERR_INTERN))
        .collect()
}

fn same_root(roots: impl Iterator<Item = usize>) -> Option<usize> {
    let mut roots = roots.peekable();
    let first = *roots.peek()?;
    roots.all(|root| root == first).then_some(first)
}

fn settle_bcast(parts: &[Bcast]) -> Vec<Outcome<Delivery>> {
    let Some(root) = same_root(parts.iter().map(|part| part.root)) else {
        return vec![Err(codes::ERR_ROOT); parts.len()];
    };
    let payload = &parts[root].data;
    parts
        .iter()
        .map(|part| {
            if part.data.len() < payload.len() {
                return Err(codes::ERR_TRUNCATE);
            }
            Ok(Delivery {
                data: Some(payload.clone()),
                comm: RawComm::NULL,
            })
        })
        .collect()
}

/// The element layout every member of a reduction agreed on.
fn agreed_layout(parts: &[Reduction]) -> Outcome<Layout> {
    let layout = parts[0].layout;
    if parts.iter().any(|part| part.layout.base != layout.base) {
        return Err(codes::ERR_TYPE);
    }
    if parts.iter().any(|part| part.layout.elements != layout.elements) {
        return Err(codes::ERR_COUNT);
    }
    Ok(layout)
}

fn settle_allreduce(parts: &[Reduction]) -> Outcome<Vec<Outcome<Delivery>>> {
    let layout = agreed_layout(parts)?;
    let contributions: Vec<&[u8]> = parts.iter().map(|part| part.data.as_slice()).collect();
    let total = parts[0].reducer.reduce(layout.base, layout.elements, &contributions)?;
    Ok(vec![
        Ok(Delivery {
            data: Some(total),
            comm: RawComm::NULL,
        });
        parts.len()
    ])
}

fn settle_exscan(parts: &[Reduction]) -> Outcome<Vec<Outcome<Delivery>>> {
    let layout = agreed_layout(parts)?;
    let contributions: Vec<&[u8]> = parts.iter().map(|part| part.data.as_slice()).collect();
    let prefixes = parts[0].reducer.prefixes(layout.base, layout.elements, &contributions)?;
    Ok((0..parts.len())
        .map(|rank| {
            Ok(Delivery {
                data: rank.checked_sub(1).map(|earlier| prefixes[earlier].clone()),
                comm: RawComm::NULL,
            })
        })
        .collect())
}

fn settle_gather(parts: &[Gather]) -> Vec<Outcome<Delivery>> {
    let Some(root) = same_root(parts.iter().map(|part| part.root)) else {
        return vec![Err(codes::ERR_ROOT); parts.len()];
    };
    let expected = parts[root].recv_bytes;
    let gathered = if parts.iter().all(|part| part.data.len() == expected) {
        Ok(parts.iter().flat_map(|part| part.data.iter().copied()).collect())
    } else {
        Err(codes::ERR_TRUNCATE)
    };
    let mut outputs = vec![Ok(Delivery::default()); parts.len()];
    outputs[root] = gathered.map(|data| Delivery {
        data: Some(data),
        comm: RawComm::NULL,
    });
    outputs
}

fn settle_gatherv(parts: &[Gatherv]) -> Vec<Outcome<Delivery>> {
    let Some(root) = same_root(parts.iter().map(|part| part.root)) else {
        return vec![Err(codes::ERR_ROOT); parts.len()];
    };
    let layout = &parts[root];
    let mut recvbuf = layout.recvbuf.clone();
    let mut gathered = Ok(());
    for (rank, part) in parts.iter().enumerate() {
        let (count, offset) = (layout.counts[rank], layout.displs[rank]);
        if part.data.len() > count {
            gathered = Err(codes::ERR_TRUNCATE);
            break;
        }
        let Some(segment) = recvbuf.get_mut(offset..offset + part.data.len()) else {
            gathered = Err(codes::ERR_BUFFER);
            break;
        };
        segment.copy_from_slice(&part.data);
    }
    let mut outputs = vec![Ok(Delivery::default()); parts.len()];
    outputs[root] = gathered.map(|()| Delivery {
        data: Some(recvbuf),
        comm: RawComm::NULL,
    });
    outputs
}

fn settle_scatterv(parts: &[Scatterv]) -> Vec<Outcome<Delivery>> {
    let Some(root) = same_root(parts.iter().map(|part| part.root)) else {
        return vec![Err(codes::ERR_ROOT); parts.len()];
    };
    let source = &parts[root];
    parts
        .iter()
        .enumerate()
        .map(|(rank, part)| {
            let (count, offset) = (source.counts[rank], source.displs[rank]);
            if count > part.capacity {
                return Err(codes::ERR_TRUNCATE);
            }
            let segment = source.data.get(offset..offset + count).ok_or(codes::ERR_BUFFER)?;
            Ok(Delivery {
                data: Some(segment.to_vec()),
                comm: RawComm::NULL,
            })
        })
        .collect()
}
