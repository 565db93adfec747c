//! Phase transitions (spec §4.6): the only places a collector may change
//! [`Phase`], always from inside a [`SyncRegion`] so the transition
//! happens-before every mutator operation that begins afterward.

use crate::error::GcResult;
use crate::heap::control_block::Phase;
use crate::heap::Heap;
use crate::sync::barrier::SyncRegion;

/// Idle -> Marking: advances the epoch and installs the new phase. Returns
/// the new epoch, or `None` if this call only piggybacked on another
/// collector's in-progress transition (spec §4.3/§4.6: concurrent collector
/// triggers collapse onto a single sync region). Fails with
/// `GcError::BarrierTimeout` if the heap's configured `sync_wait_timeout`
/// elapses first (spec §5/§7).
pub fn begin_marking(heap: &Heap) -> GcResult<Option<u8>> {
    let control = heap.control_block();
    let region = SyncRegion::enter_timeout(control.barrier.as_ref(), heap.sync_wait_timeout())?;
    if !region.did_sync() {
        return Ok(None);
    }
    let epoch = control.advance_epoch();
    control.set_phase(Phase::Marking);
    Ok(Some(epoch))
}

/// Marking -> Sweeping.
pub fn begin_sweeping(heap: &Heap) -> GcResult<bool> {
    let control = heap.control_block();
    let region = SyncRegion::enter_timeout(control.barrier.as_ref(), heap.sync_wait_timeout())?;
    let did_sync = region.did_sync();
    if did_sync {
        control.set_phase(Phase::Sweeping);
    }
    Ok(did_sync)
}

/// Sweeping -> Idle: the cycle's final transition.
pub fn end_cycle(heap: &Heap) -> GcResult<bool> {
    let control = heap.control_block();
    let region = SyncRegion::enter_timeout(control.barrier.as_ref(), heap.sync_wait_timeout())?;
    let did_sync = region.did_sync();
    if did_sync {
        control.set_phase(Phase::Idle);
    }
    Ok(did_sync)
}

/// Enters a brief sync region purely to get a consistent read of whether the
/// grey log is empty (spec §4.6: "the transition out of Marking re-checks
/// the grey log from inside a sync region, since a mutator could otherwise
/// push an entry in the gap between the drain loop's last pop and the phase
/// change"). Returns whether the log was empty at that synchronized point.
pub fn grey_log_empty_under_sync(heap: &Heap) -> GcResult<bool> {
    let control = heap.control_block();
    let _region = SyncRegion::enter_timeout(control.barrier.as_ref(), heap.sync_wait_timeout())?;
    Ok(control.grey_log().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn full_cycle_of_transitions_returns_to_idle() {
        let heap = test_heap();
        assert_eq!(begin_marking(&heap).unwrap(), Some(1));
        assert_eq!(heap.control_block().phase(), Phase::Marking);
        assert!(grey_log_empty_under_sync(&heap).unwrap());
        assert!(begin_sweeping(&heap).unwrap());
        assert_eq!(heap.control_block().phase(), Phase::Sweeping);
        assert!(end_cycle(&heap).unwrap());
        assert_eq!(heap.control_block().phase(), Phase::Idle);
    }

    /// spec §5/§7: a bounded sync wait that can't be satisfied (here, a
    /// mutate region that's never released) fails with `BarrierTimeout`
    /// rather than hanging, and credits the sync region back so the barrier
    /// is left exactly as if the call had never happened: the phase is
    /// still `Idle`, and a subsequent `begin_marking` after the mutator
    /// finally exits succeeds normally.
    #[test]
    fn begin_marking_times_out_while_a_mutate_region_never_exits() {
        use crate::error::GcError;
        use crate::sync::barrier::MutateRegion;
        use std::time::Duration;

        let mut heap = test_heap();
        heap.set_sync_wait_timeout(Some(Duration::from_millis(20)));
        let mutate = MutateRegion::enter(heap.control_block().barrier.as_ref());

        let result = begin_marking(&heap);
        assert_eq!(result, Err(GcError::BarrierTimeout));
        assert_eq!(heap.control_block().phase(), Phase::Idle);

        drop(mutate);
        assert_eq!(begin_marking(&heap).unwrap(), Some(1));
    }
}
