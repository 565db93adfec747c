//! The weak pointer (spec §4.5, component C6): observes a referent without
//! keeping it alive, and nulls itself out when that referent dies during a
//! Sweeping phase (spec §4.4).

use std::marker::PhantomData;

use atomic::Ordering;

use crate::heap::control_block::Phase;
use crate::heap::header::Color;
use crate::heap::Heap;
use crate::pointer::offset::{AtomicOffsetWord, OffsetPtr, OffsetWord, PointerKind};
use crate::sync::write_barrier::{write_barrier, AtomicSlot, Container};

/// A managed, weak reference field. Never keeps its referent alive (spec
/// §4.4: "weak references never contribute to reachability"); `lock` is the
/// only way to obtain a (temporary) strong view of the referent.
#[repr(transparent)]
pub struct WeakPtr<T> {
    cell: AtomicOffsetWord,
    _marker: PhantomData<fn() -> T>,
}

impl<T> WeakPtr<T> {
    pub fn null() -> Self {
        WeakPtr {
            cell: AtomicOffsetWord::new(OffsetWord::NULL),
            _marker: PhantomData,
        }
    }

    /// The raw weak word, tag included. Reads are never barriered.
    fn raw(&self) -> OffsetWord {
        self.cell.load(Ordering::Acquire)
    }

    pub fn is_null(&self) -> bool {
        self.raw().is_null()
    }

    /// Stores a new referent. `new_value` is tagged `Weak` regardless of the
    /// tag the caller passed in, since a weak field always stores the weak
    /// variant of the word (spec §4.1: "casting between strong and weak is a
    /// purely compile-time reinterpretation" — the field, not the pointer
    /// type, decides the tag).
    pub fn set(&self, heap: &Heap, container: Container, new_value: OffsetPtr<T>) {
        let weak_word = new_value.word().with_kind(PointerKind::Weak);
        let slot = AtomicSlot { cell: &self.cell };
        write_barrier(heap.control_block(), heap, &slot, container, weak_word);
    }

    /// Attempts to promote this weak reference to a strong, live view of its
    /// referent (spec §4.5: "locking a weak pointer").
    ///
    /// - During `Sweeping`, a referent observed White and not
    ///   sweep-allocated is treated as already dead, even if the barrier
    ///   hasn't yet raced in to null this particular word — `lock` must never
    ///   hand back a pointer to a collected object.
    /// - During `Marking`, a White referent is re-greyed and enqueued so the
    ///   current cycle keeps it alive (the same promotion the write barrier
    ///   performs for strong stores into a Black container, spec §4.4):
    ///   having been observed reachable via this lock, it must survive to the
    ///   cycle's end.
    /// - During `Idle`, a referent left White from a prior cycle that swept
    ///   past it without nulling this particular word (the barrier only
    ///   nulls weak words on a store during Sweeping, not on every dead
    ///   referent) is still dead and must not be handed back; checked via
    ///   [`crate::heap::header::ObjectHeader::is_live`].
    pub fn lock(&self, heap: &Heap) -> Option<OffsetPtr<T>> {
        let word = self.raw();
        if word.is_null() {
            return None;
        }
        let strong_word = word.with_kind(PointerKind::Normal);
        // SAFETY: a non-null weak word names a live, resolvable offset in
        // this heap's mapping by construction of every weak-field store.
        let header = unsafe { heap.header_at(strong_word) };

        match heap.control_block().phase() {
            Phase::Sweeping => {
                if header.color() == Color::White && !header.sweep_allocated() {
                    return None;
                }
            }
            Phase::Marking => {
                if header.try_set_color(Color::White, Color::Grey) {
                    heap.control_block().grey_log().push(strong_word);
                }
            }
            Phase::Idle => {
                if !header.is_live(heap.control_block().epoch()) {
                    return None;
                }
            }
        }
        Some(OffsetPtr::from_word(strong_word))
    }
}

impl<T> Default for WeakPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}
