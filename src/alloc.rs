//! The allocator (spec §3/§4.2, component C3): carves object headers and
//! bodies out of a heap's free lists or bump-allocation frontier.

use crate::error::{GcError, GcResult};
use crate::heap::control_block::Phase;
use crate::heap::header::{Color, ObjectHeader};
use crate::heap::Heap;
use crate::pointer::offset::{OffsetWord, PointerKind};
use crate::util::constants::{size_class_bytes, size_class_for, OBJECT_HEADER_BYTES};

/// Carves new objects out of a [`Heap`]. Stateless beyond the heap reference;
/// any number of allocators (e.g. one per mutator thread) may share one heap,
/// since every underlying operation (`free_list.take`, `bump_frontier`) is
/// itself lock-free (spec §4.2: "allocation never blocks on the barrier").
pub struct Allocator<'h> {
    heap: &'h Heap,
}

impl<'h> Allocator<'h> {
    pub fn new(heap: &'h Heap) -> Self {
        Allocator { heap }
    }

    /// Allocates an object with the given type descriptor and body size,
    /// returning an offset word naming the object's *body* (spec §6: "a
    /// managed pointer always names the body, not the header").
    ///
    /// Initializes the header per spec §4.2's birth rules: Black-at-birth
    /// during Marking (the object is conservatively treated as already
    /// scanned, so it is never missed even though the marker will never
    /// visit it), and `sweep_allocated` set iff the current phase is
    /// Sweeping (so a concurrent sweep does not reclaim an object it never
    /// got to initialize headers for before this allocation raced in).
    pub fn allocate(&self, type_desc: OffsetWord, body_bytes: usize) -> GcResult<OffsetWord> {
        let total_bytes = OBJECT_HEADER_BYTES + body_bytes;
        let control = self.heap.control_block();

        let header_offset = match size_class_for(total_bytes) {
            Some(class) => match control.free_list(class).take() {
                Some(block) => block.offset(),
                None => {
                    let block_bytes = size_class_bytes(class);
                    let offset = control
                        .bump_frontier(block_bytes as u64)
                        .ok_or(GcError::OutOfHeap)?;
                    control.register_block(offset, block_bytes);
                    offset as i64
                }
            },
            None => {
                let offset = control
                    .bump_frontier(total_bytes as u64)
                    .ok_or(GcError::OutOfHeap)?;
                control.register_block(offset, total_bytes);
                offset as i64
            }
        };

        let phase = control.phase();
        let color = if phase == Phase::Marking {
            Color::Black
        } else {
            Color::White
        };
        let sweep_allocated = phase == Phase::Sweeping;
        let epoch = control.epoch();

        let header_addr = (self.heap.base() as i64 + header_offset) as *mut ObjectHeader;
        // SAFETY: `header_offset` names a freshly carved block (either from
        // a free list that only ever holds blocks this allocator retired, or
        // a fresh frontier bump), so no other reference to these bytes
        // exists yet.
        unsafe {
            ObjectHeader::init_at(header_addr, type_desc, epoch, color, sweep_allocated);
        }

        let body_offset = header_offset + OBJECT_HEADER_BYTES as i64;
        Ok(OffsetWord::new(body_offset, PointerKind::Normal))
    }

    /// Returns a reclaimed object's block to its size class's free list
    /// (spec §4.6: "sweep donates reclaimed blocks back to their size
    /// class's free list rather than returning them to the OS").
    ///
    /// `body_bytes` must match the size the object was originally allocated
    /// with, so the block lands back in the same size class.
    pub fn free_list_donate(&self, object_body: OffsetWord, body_bytes: usize) {
        let total_bytes = OBJECT_HEADER_BYTES + body_bytes;
        let Some(class) = size_class_for(total_bytes) else {
            return;
        };
        let header_offset = object_body.offset() - OBJECT_HEADER_BYTES as i64;
        let block = OffsetWord::new(header_offset, PointerKind::Normal);
        self.heap.control_block().free_list(class).donate(block);
    }
}
