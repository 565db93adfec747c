//! The control block (spec §3/§6, component C2): the per-process-visible,
//! shared-memory singleton describing the current state of the heap.
//!
//! One `ControlBlock` lives in the managed segment; every attached process
//! maps the same bytes and therefore observes the same phase, epoch and
//! grey-log head (spec §4.6: "Multi-process coordination").

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering as StdOrdering};
use std::sync::{Arc, Mutex};

use crossbeam::deque::Injector;

use crate::pointer::offset::OffsetWord;
use crate::sync::barrier::Barrier;
use crate::util::constants::NUM_SIZE_CLASSES;

/// Collector phase (spec §3/§4.6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Marking = 1,
    Sweeping = 2,
}

impl Phase {
    #[inline(always)]
    fn from_u8(v: u8) -> Phase {
        match v {
            0 => Phase::Idle,
            1 => Phase::Marking,
            _ => Phase::Sweeping,
        }
    }
}

/// A free list for one size class: a lock-free stack of block offsets.
/// Built on [`crossbeam::deque::Injector`], the same structure the backing
/// framework uses for its lock-free work-distribution queues — here with a
/// many-producer (mutators freeing blocks), many-consumer (allocators
/// across processes) access pattern.
#[derive(Default)]
pub struct FreeList {
    blocks: Injector<OffsetWord>,
}

impl FreeList {
    pub fn new() -> Self {
        FreeList {
            blocks: Injector::new(),
        }
    }

    pub fn donate(&self, block: OffsetWord) {
        self.blocks.push(block);
    }

    /// Pops one free block, if any. Multiple allocators across processes may
    /// call this concurrently; `Injector::steal` already handles that.
    pub fn take(&self) -> Option<OffsetWord> {
        loop {
            match self.blocks.steal() {
                crossbeam::deque::Steal::Success(block) => return Some(block),
                crossbeam::deque::Steal::Empty => return None,
                crossbeam::deque::Steal::Retry => continue,
            }
        }
    }
}

/// The grey log (spec §3/§4.4): a lock-free, multi-producer structure of
/// objects awaiting scan during Marking. Mutators push into it from the
/// write barrier; the collector's marking work loop is the logical single
/// consumer (spec calls this MPSC; `Injector` is the framework's standard
/// lock-free queue and serves the same role the grey log plays for the
/// scheduler's work buckets).
#[derive(Default)]
pub struct GreyLog {
    entries: Injector<OffsetWord>,
}

impl GreyLog {
    pub fn new() -> Self {
        GreyLog {
            entries: Injector::new(),
        }
    }

    /// Enqueues an object for scanning. Spec §4.4: pushed *before* the
    /// barrier's committing CAS, so a lost CAS race leaves only a benign
    /// duplicate entry (idempotent re-scan, spec §8 property 7).
    pub fn push(&self, entry: OffsetWord) {
        self.entries.push(entry);
    }

    pub fn pop(&self) -> Option<OffsetWord> {
        loop {
            match self.entries.steal() {
                crossbeam::deque::Steal::Success(entry) => return Some(entry),
                crossbeam::deque::Steal::Empty => return None,
                crossbeam::deque::Steal::Retry => continue,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One block ever carved from the frontier, recorded so the sweeper (spec
/// §4.6) can walk every allocation without needing to parse variable-length
/// object bodies. `total_bytes` is the whole header+body span, which is all
/// the sweeper needs to either leave a survivor alone or donate a dead
/// block back to its size class.
///
/// Grounded in the backing framework's side-metadata approach
/// (`mmtk::util::metadata::side_metadata`): rather than require in-band
/// size information the allocator would have to thread through every
/// pointer type, the sweeper consults a side table built up as blocks are
/// carved.
#[derive(Copy, Clone, Debug)]
pub struct AllocatedBlock {
    pub header_offset: u64,
    pub total_bytes: usize,
}

/// Process-wide singleton view of the shared heap state (spec §3:
/// "Control block"). Every attached process holds an `Arc<ControlBlock>`
/// (or, once the OS-mapper subsystem is wired in, a reference into the
/// shared segment at the same offset); either way all processes observe the
/// same phase, epoch and grey log.
pub struct ControlBlock {
    /// Base address of this process's mapping of the managed segment.
    /// Process-local: every attached process computes its own, even though
    /// they name the same underlying shared memory object.
    pub mapping_base: usize,
    pub mapping_length: usize,

    phase: AtomicU8,
    /// Monotone counter, incremented at each Marking entry (spec glossary:
    /// "Epoch"). Wraps modulo 256 — the header's generation stamp is 8 bits
    /// (spec §6), so this crate treats wrap-around as expected behavior
    /// rather than an error: an object's liveness is only ever compared
    /// against the *current* epoch, never across a full wrap.
    epoch: AtomicU64,

    grey_log: GreyLog,
    free_lists: [FreeList; NUM_SIZE_CLASSES],
    /// Bump-allocation frontier, relative to `mapping_base`, used once a
    /// size class's free list is empty (spec §4.2).
    frontier: AtomicU64,

    /// Side table of every block ever carved from the frontier, walked by
    /// the sweeper (spec §4.6). Only ever appended to by a fresh frontier
    /// carve, never by a free-list reuse (the offset is already present).
    allocated: Mutex<Vec<AllocatedBlock>>,

    pub barrier: Arc<Barrier>,
}

impl ControlBlock {
    pub fn new(mapping_base: usize, mapping_length: usize, frontier_offset: u64) -> Self {
        ControlBlock {
            mapping_base,
            mapping_length,
            phase: AtomicU8::new(Phase::Idle as u8),
            epoch: AtomicU64::new(0),
            grey_log: GreyLog::new(),
            free_lists: std::array::from_fn(|_| FreeList::new()),
            frontier: AtomicU64::new(frontier_offset),
            allocated: Mutex::new(Vec::new()),
            barrier: Arc::new(Barrier::new()),
        }
    }

    #[inline(always)]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(StdOrdering::Acquire))
    }

    /// Installs a new phase. Must only be called from inside a sync region
    /// (spec §4.6): every phase transition happens-before every mutator
    /// operation that begins in the new epoch.
    ///
    /// Normally only `crate::collector::phase` calls this; widened to `pub`
    /// under `test_private` so integration tests can drive the phase machine
    /// by hand (spec §8 scenario S4 needs to block the collector
    /// mid-Sweeping, which the public `Collector` API alone cannot set up).
    #[cfg(not(feature = "test_private"))]
    #[inline(always)]
    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, StdOrdering::Release);
    }

    #[cfg(feature = "test_private")]
    #[inline(always)]
    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, StdOrdering::Release);
    }

    #[inline(always)]
    pub fn epoch(&self) -> u8 {
        (self.epoch.load(StdOrdering::Acquire) & 0xff) as u8
    }

    /// Advances the epoch by one. Called once per Idle->Marking transition,
    /// from inside a sync region.
    #[inline(always)]
    pub(crate) fn advance_epoch(&self) -> u8 {
        let next = self.epoch.fetch_add(1, StdOrdering::AcqRel).wrapping_add(1);
        (next & 0xff) as u8
    }

    pub fn grey_log(&self) -> &GreyLog {
        &self.grey_log
    }

    pub fn free_list(&self, size_class: usize) -> &FreeList {
        &self.free_lists[size_class]
    }

    /// Bumps the frontier by `size_bytes`, returning the offset of the
    /// carved block, or `None` if this would run past the mapping length
    /// (spec §4.2: "bumps from the current segment frontier under atomic
    /// compare-and-swap"; §7: the caller sees this as `GcError::OutOfHeap`).
    pub fn bump_frontier(&self, size_bytes: u64) -> Option<u64> {
        let mut current = self.frontier.load(StdOrdering::Acquire);
        loop {
            let next = current.checked_add(size_bytes)?;
            if next as usize > self.mapping_length {
                return None;
            }
            match self.frontier.compare_exchange_weak(
                current,
                next,
                StdOrdering::AcqRel,
                StdOrdering::Acquire,
            ) {
                Ok(_) => return Some(current),
                Err(actual) => current = actual,
            }
        }
    }

    /// Records a freshly carved block for the sweeper to find later.
    pub(crate) fn register_block(&self, header_offset: u64, total_bytes: usize) {
        self.allocated
            .lock()
            .unwrap()
            .push(AllocatedBlock { header_offset, total_bytes });
    }

    /// A snapshot of every block ever carved from the frontier, for the
    /// sweeper to walk (spec §4.6).
    pub fn allocated_blocks(&self) -> Vec<AllocatedBlock> {
        self.allocated.lock().unwrap().clone()
    }
}
