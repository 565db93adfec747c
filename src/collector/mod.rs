//! The collector (spec §3/§4.6, component C7): drives one heap through a
//! full Idle -> Marking -> Sweeping -> Idle cycle, scanning roots and
//! managed object fields via the (consumed) type registry and reclaiming
//! dead objects back to their size class's free list.

pub mod phase;

use atomic::Ordering;
use log::debug;

use crate::alloc::Allocator;
use crate::error::GcResult;
use crate::heap::header::{Color, ObjectHeader};
use crate::heap::Heap;
use crate::pointer::offset::OffsetWord;
use crate::types::FieldKind;
use crate::util::constants::OBJECT_HEADER_BYTES;

/// Drives collection cycles for one attached heap. Stateless beyond the heap
/// reference; typically only one process runs a `Collector` at a time, but
/// nothing here prevents several processes from racing `collect_cycle` —
/// the barrier collapses them onto a single actual cycle per spec §4.3.
pub struct Collector<'h> {
    heap: &'h Heap,
}

impl<'h> Collector<'h> {
    pub fn new(heap: &'h Heap) -> Self {
        Collector { heap }
    }

    /// Runs one full collection cycle (spec §4.6), returning the number of
    /// objects reclaimed. Returns `Ok(0)` without doing any work if this
    /// call only piggybacked on a concurrently-running cycle (spec §4.3,
    /// S6). Fails with `GcError::BarrierTimeout` if the heap's configured
    /// `sync_wait_timeout` elapses waiting for a sync region (spec §5/§7);
    /// by default that wait is unbounded and this never happens.
    pub fn collect_cycle(&self) -> GcResult<usize> {
        let Some(epoch) = phase::begin_marking(self.heap)? else {
            debug!("collect_cycle: piggybacked on an in-progress cycle");
            return Ok(0);
        };
        debug!("collect_cycle: entering Marking, epoch {epoch}");

        self.scan_roots(epoch);
        self.drain_grey_log(epoch);
        while !phase::grey_log_empty_under_sync(self.heap)? {
            self.drain_grey_log(epoch);
        }

        if !phase::begin_sweeping(self.heap)? {
            debug!("collect_cycle: lost the race to begin Sweeping; another caller owns this cycle");
            return Ok(0);
        }
        debug!("collect_cycle: entering Sweeping");

        let reclaimed = self.sweep(epoch);

        #[cfg(feature = "extreme_assertions")]
        self.verify_tri_color_invariant(epoch);

        if !phase::end_cycle(self.heap)? {
            debug!("collect_cycle: lost the race to close out Sweeping");
        }
        debug!("collect_cycle: cycle complete, {reclaimed} objects reclaimed");
        Ok(reclaimed)
    }

    /// Re-walks every surviving block and re-checks spec §8 invariant 1 (a
    /// reachable object's color is never White under the current epoch).
    /// Gated behind `extreme_assertions` since it redundantly repeats work
    /// the sweep itself already did; useful when chasing a barrier bug, not
    /// for production cycles.
    #[cfg(feature = "extreme_assertions")]
    fn verify_tri_color_invariant(&self, epoch: u8) {
        for block in self.heap.control_block().allocated_blocks() {
            let header_addr =
                (self.heap.base() as i64 + block.header_offset as i64) as *const ObjectHeader;
            // SAFETY: every registered block names a header this allocator
            // itself initialized and that remains valid for the heap's
            // lifetime.
            let header = unsafe { &*header_addr };
            if header.generation() == epoch {
                debug_assert_ne!(
                    header.color(),
                    Color::White,
                    "surviving object at offset {} is White after its own sweep pass",
                    block.header_offset
                );
            }
        }
    }

    /// Greys every root that isn't already marked this epoch (spec §4.6:
    /// "roots are scanned at the start of every Marking phase").
    fn scan_roots(&self, epoch: u8) {
        for root in self.heap.roots().snapshot() {
            if root.is_null() {
                continue;
            }
            // SAFETY: roots only ever hold live offset words resolvable
            // against this heap's mapping.
            let header = unsafe { self.heap.header_at(root) };
            if mark_grey(header, epoch) {
                self.heap.control_block().grey_log().push(root);
            }
        }
    }

    /// Pops every entry currently in the grey log, blackens it, and follows
    /// its strong/external fields via the type registry (spec §4.6: "the
    /// marking work loop").
    fn drain_grey_log(&self, epoch: u8) {
        while let Some(word) = self.heap.control_block().grey_log().pop() {
            // SAFETY: every grey-log entry is a live offset word, pushed
            // either by a root scan or a barriered/marking store.
            let header = unsafe { self.heap.header_at(word) };
            header.try_set_color(crate::heap::header::Color::Grey, Color::Black);

            for field in self.heap.types().fields_of(header.type_desc()) {
                if !field.field_kind.keeps_alive() {
                    continue;
                }
                // SAFETY: `field.field_offset` is within this object's body,
                // which is exactly `word`'s resolved address, per the type
                // registry's contract.
                let value = unsafe { self.read_field(word, field.field_offset) };
                if value.is_null() {
                    continue;
                }
                // SAFETY: a pointer field holds either null or a live offset
                // word resolvable against this heap's mapping.
                let referent_header = unsafe { self.heap.header_at(value) };
                if mark_grey(referent_header, epoch) {
                    self.heap.control_block().grey_log().push(value);
                }
            }
        }
    }

    /// Reads the raw offset word stored at `field_offset` bytes into the
    /// object named by `body`. Every C6 pointer type is `#[repr(transparent)]`
    /// over an atomic offset word, so this is a plain atomic load through a
    /// reinterpreted pointer.
    ///
    /// # Safety
    /// `body` must resolve to a live object of a type whose registry entry
    /// reports a pointer field at `field_offset`.
    unsafe fn read_field(&self, body: OffsetWord, field_offset: usize) -> OffsetWord {
        let addr = body.resolve(self.heap.base()) + field_offset;
        (*(addr as *const atomic::Atomic<OffsetWord>)).load(Ordering::Acquire)
    }

    /// Walks every block ever carved from the frontier (spec §4.6: "linear
    /// heap sweep"), donating dead ones back to their size class and
    /// clearing the sweep-allocated flag on survivors.
    fn sweep(&self, epoch: u8) -> usize {
        let allocator = Allocator::new(self.heap);
        let mut reclaimed = 0;
        for block in self.heap.control_block().allocated_blocks() {
            let header_addr = (self.heap.base() as i64 + block.header_offset as i64) as *const ObjectHeader;
            // SAFETY: every registered block names a header this allocator
            // itself initialized and that remains valid for the heap's
            // lifetime.
            let header = unsafe { &*header_addr };
            let live = header.generation() == epoch && header.color() != Color::White;
            if live {
                header.clear_sweep_allocated();
                continue;
            }
            let body_bytes = block.total_bytes - OBJECT_HEADER_BYTES;
            let body = OffsetWord::new(
                block.header_offset as i64 + OBJECT_HEADER_BYTES as i64,
                crate::pointer::offset::PointerKind::Normal,
            );
            allocator.free_list_donate(body, body_bytes);
            reclaimed += 1;
        }
        reclaimed
    }
}

/// Greys `header` for `epoch` if it isn't already marked this epoch.
/// Any header whose stamped generation doesn't match the current epoch is
/// implicitly White for this epoch regardless of its leftover color (spec
/// §3: "an object's liveness is only ever compared against the current
/// epoch"), so this also repaints stale survivors from past cycles.
///
/// Returns `true` the first time a given object is greyed this epoch, so
/// the caller knows whether to enqueue it.
fn mark_grey(header: &ObjectHeader, epoch: u8) -> bool {
    if header.generation() == epoch && header.color() != Color::White {
        return false;
    }
    header.set(Color::Grey, epoch, false);
    true
}
