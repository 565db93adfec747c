//! The strong pointer (spec §4.5, component C6): an in-heap field that keeps
//! its referent alive and whose every store routes through the write barrier
//! (spec §4.4).

use std::marker::PhantomData;

use atomic::Ordering;

use crate::heap::Heap;
use crate::pointer::offset::{AtomicOffsetWord, OffsetPtr, OffsetWord};
use crate::sync::write_barrier::{write_barrier, AtomicSlot, Container};

/// A managed, strong reference field. Lives inside an object body (or is a
/// root) and is always accessed through a [`Heap`] so every store can be
/// barriered (spec §4.4: "every pointer-typed field store in managed memory
/// is intercepted").
#[repr(transparent)]
pub struct StrongPtr<T> {
    cell: AtomicOffsetWord,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StrongPtr<T> {
    pub fn null() -> Self {
        StrongPtr {
            cell: AtomicOffsetWord::new(OffsetWord::NULL),
            _marker: PhantomData,
        }
    }

    /// Reads the current referent without taking part in any barrier
    /// protocol (spec §4.4: "reads are never barriered, only writes").
    pub fn get(&self) -> OffsetPtr<T> {
        OffsetPtr::from_word(self.cell.load(Ordering::Acquire))
    }

    pub fn is_null(&self) -> bool {
        self.get().is_null()
    }

    /// Stores a new referent, barriered against the current collector phase.
    /// `container` is this field's enclosing object, if any (`None` for a
    /// root), needed for the Dijkstra promotion rule (spec §4.4).
    pub fn set(&self, heap: &Heap, container: Container, new_value: OffsetPtr<T>) {
        let slot = AtomicSlot { cell: &self.cell };
        write_barrier(heap.control_block(), heap, &slot, container, new_value.word());
    }
}

impl<T> Default for StrongPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::segment::AnonymousMmapMapper;
    use crate::roots::LocalRootDirectory;
    use crate::types::StaticTypeRegistry;
    use crate::alloc::Allocator;
    use std::sync::Arc;

    fn test_heap() -> Heap {
        Heap::create(
            Arc::new(AnonymousMmapMapper),
            1 << 16,
            Arc::new(LocalRootDirectory::new()),
            Arc::new(StaticTypeRegistry::new()),
        )
        .unwrap()
    }

    #[test]
    fn fresh_strong_ptr_is_null() {
        let ptr: StrongPtr<u64> = StrongPtr::null();
        assert!(ptr.is_null());
    }

    #[test]
    fn set_then_get_round_trips() {
        let heap = test_heap();
        let alloc = Allocator::new(&heap);
        let target = alloc.allocate(OffsetWord::NULL, 8).unwrap();
        let field: StrongPtr<u64> = StrongPtr::null();

        field.set(&heap, None, OffsetPtr::from_word(target));

        assert_eq!(field.get().word(), target);
    }
}
