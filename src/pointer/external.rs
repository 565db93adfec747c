//! The external pointer (spec §4.5, component C6): a handle held by
//! non-managed (host-process) memory, registered as a root so the collector
//! can see it without being able to scan host memory directly.

use std::marker::PhantomData;

use crate::heap::Heap;
use crate::pointer::offset::{OffsetPtr, OffsetWord, PointerKind};

/// A root-registered handle to a managed object, for use by memory the
/// collector cannot otherwise scan (spec §4.5: "external pointers register
/// themselves with the root directory on construction and deregister on
/// destruction").
pub struct ExternalPtr<'h, T> {
    heap: &'h Heap,
    root_name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<'h, T> ExternalPtr<'h, T> {
    /// Registers `target` under `root_name` in `heap`'s root directory. Two
    /// live `ExternalPtr`s must not share a `root_name`, since the second
    /// registration silently overwrites the first (spec §6: the root
    /// directory is a plain name -> pointer map).
    pub fn new(heap: &'h Heap, root_name: impl Into<String>, target: OffsetPtr<T>) -> Self {
        let root_name = root_name.into();
        heap.roots()
            .store(&root_name, target.word().with_kind(PointerKind::External));
        ExternalPtr {
            heap,
            root_name,
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> OffsetPtr<T> {
        let word = self.heap.roots().lookup(&self.root_name).unwrap_or(OffsetWord::NULL);
        OffsetPtr::from_word(word)
    }

    pub fn is_null(&self) -> bool {
        self.get().is_null()
    }

    /// Replaces this root's target. External pointers are not routed through
    /// the write barrier: roots are scanned wholesale at the start of every
    /// Marking phase (spec §6), so there is no snapshot to preserve and no
    /// container to promote into.
    pub fn set(&self, target: OffsetPtr<T>) {
        self.heap
            .roots()
            .store(&self.root_name, target.word().with_kind(PointerKind::External));
    }
}

impl<T> Drop for ExternalPtr<'_, T> {
    fn drop(&mut self) {
        self.heap.roots().remove(&self.root_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Allocator;
    use crate::heap::segment::AnonymousMmapMapper;
    use crate::roots::LocalRootDirectory;
    use crate::types::StaticTypeRegistry;
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
    fn construction_registers_as_a_root() {
        let heap = test_heap();
        let alloc = Allocator::new(&heap);
        let target = alloc.allocate(OffsetWord::NULL, 8).unwrap();

        let ext: ExternalPtr<u64> = ExternalPtr::new(&heap, "handle", OffsetPtr::from_word(target));
        assert_eq!(ext.get().word(), target);
        assert_eq!(heap.roots().snapshot(), vec![target.with_kind(PointerKind::External)]);
    }

    #[test]
    fn drop_deregisters_the_root() {
        let heap = test_heap();
        let alloc = Allocator::new(&heap);
        let target = alloc.allocate(OffsetWord::NULL, 8).unwrap();

        {
            let _ext: ExternalPtr<u64> =
                ExternalPtr::new(&heap, "handle", OffsetPtr::from_word(target));
            assert!(!heap.roots().snapshot().is_empty());
        }
        assert!(heap.roots().snapshot().is_empty());
    }

    #[test]
    fn set_replaces_the_root_target() {
        let heap = test_heap();
        let alloc = Allocator::new(&heap);
        let a = alloc.allocate(OffsetWord::NULL, 8).unwrap();
        let b = alloc.allocate(OffsetWord::NULL, 8).unwrap();

        let ext: ExternalPtr<u64> = ExternalPtr::new(&heap, "handle", OffsetPtr::from_word(a));
        ext.set(OffsetPtr::from_word(b));
        assert_eq!(ext.get().word(), b);
    }
}
