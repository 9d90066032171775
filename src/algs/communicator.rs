//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices. All handles are waitable; the exchange
//! routines post every receive, then every send, and only trust a payload after
//! `.wait()` returns it. A received payload is handed back whole: callers check
//! its length themselves and never truncate.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Non-blocking point-to-point communication between the nodes of one run.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// This node's id in `[0, size)`.
    fn rank(&self) -> usize;
    /// Number of nodes.
    fn size(&self) -> usize;

    /// Block until every node has entered the barrier.
    ///
    /// The default runs a gather/release through node 0 on a reserved tag.
    fn barrier(&self) {
        let (rank, size) = (self.rank(), self.size());
        if size <= 1 {
            return;
        }
        if rank == 0 {
            let arrivals: Vec<_> = (1..size).map(|p| self.irecv(p, BARRIER_TAG)).collect();
            for h in arrivals {
                let _ = h.wait();
            }
            let releases: Vec<_> = (1..size).map(|p| self.isend(p, BARRIER_TAG, &[])).collect();
            for h in releases {
                let _ = h.wait();
            }
        } else {
            let release = self.irecv(0, BARRIER_TAG);
            let _ = self.isend(0, BARRIER_TAG, &[]).wait();
            let _ = release.wait();
        }
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Tag reserved for the default barrier.
pub const BARRIER_TAG: u16 = u16::MAX;

/// Typed message tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(raw: u16) -> Self {
        CommTag(raw)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `k` slots after this one, for per-zone or per-dimension sub-messages.
    #[inline]
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Disjoint tag ranges for every exchange phase of the decomposition.
///
/// Each phase owns `PHASE_STRIDE` consecutive tags so that per-zone and
/// per-dimension messages of one phase never collide with another phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DdCommTags {
    pub distribute: CommTag,
    pub collect: CommTag,
    pub halo_setup: CommTag,
    pub halo_x: CommTag,
    pub halo_f: CommTag,
    pub migrate: CommTag,
    pub con_setup: CommTag,
    pub con_x: CommTag,
    pub con_f: CommTag,
    pub reduce: CommTag,
}

impl DdCommTags {
    pub const PHASE_STRIDE: u16 = 0x40;

    pub const fn from_base(base: CommTag) -> Self {
        let s = Self::PHASE_STRIDE;
        Self {
            distribute: base,
            collect: base.offset(s),
            halo_setup: base.offset(2 * s),
            halo_x: base.offset(3 * s),
            halo_f: base.offset(4 * s),
            migrate: base.offset(5 * s),
            con_setup: base.offset(6 * s),
            con_x: base.offset(7 * s),
            con_f: base.offset(8 * s),
            reduce: base.offset(9 * s),
        }
    }
}

/// Compile-time no-op comm for single-node runs and serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// --- ThreadComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Shared mailbox: per-key FIFO queues plus a wakeup for blocked receivers.
#[derive(Default)]
pub struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
    lock: Mutex<()>,
    ready: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        self.slots.entry(key).or_default().push_back(data);
        let _g = self.lock.lock();
        self.ready.notify_all();
    }

    fn try_take(&self, key: &Key) -> Option<Bytes> {
        let mut q = self.slots.get_mut(key)?;
        q.pop_front()
    }

    fn take_blocking(&self, key: &Key) -> Bytes {
        let mut guard = self.lock.lock();
        loop {
            if let Some(b) = self.try_take(key) {
                return b;
            }
            self.ready.wait(&mut guard);
        }
    }
}

static MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(Mailbox::default()));

/// Receive handle of a [`ThreadComm`]; blocks in `wait` until the message arrives.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        Some(self.mailbox.take_blocking(&self.key).to_vec())
    }
}

/// Communicator for nodes simulated as threads of one process.
///
/// Messages with the same `(src, dst, tag)` are delivered in send order.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl ThreadComm {
    /// Attach to the process-global mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: MAILBOX.clone(),
        }
    }

    /// One communicator per rank over a private mailbox.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: mailbox.clone(),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalHandle {
        LocalHandle {
            mailbox: self.mailbox.clone(),
            key: (peer, self.rank, tag),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{
        Communicator as _, CommunicatorCollectives as _, Destination as _, Source as _,
    };

    /// Communicator over `MPI_COMM_WORLD`.
    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initialize MPI. Returns `None` if MPI was already initialized.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    /// In-flight send; owns the payload until the request completes.
    pub struct MpiSend {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait();
            // SAFETY: `buf` was leaked in `isend` and the request using it has completed.
            unsafe { drop(Box::from_raw(self.buf)) };
            None
        }
    }

    /// Deferred receive; performs the matching receive in `wait`.
    pub struct MpiRecv {
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let world = SimpleCommunicator::world();
            let (data, _status) = world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            // SAFETY: the leaked box stays alive until `MpiSend::wait` frees it.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                data,
                tag as i32,
            );
            MpiSend { req, buf: ptr }
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecv {
            MpiRecv {
                peer: peer as i32,
                tag: tag as i32,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
