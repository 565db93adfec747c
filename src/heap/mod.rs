//! The managed heap: ties a mapped segment, its control block, and the two
//! consumed collaborator interfaces (root directory, type registry) into one
//! handle processes attach through.

pub mod control_block;
pub mod header;
pub mod segment;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{GcError, GcResult};
use crate::options::GcConfig;
use crate::pointer::offset::OffsetWord;
use crate::roots::RootDirectory;
use crate::sync::write_barrier::HeaderLookup;
use crate::types::TypeRegistry;
use crate::util::constants::{OBJECT_HEADER_BYTES, SEGMENT_HEADER_BYTES};

use control_block::ControlBlock;
use header::ObjectHeader;
use segment::{OsMapper, SegmentHeader};

/// A process's attachment to the managed segment (spec §3: "a process attaches
/// by mapping the shared segment and constructing a `ControlBlock` view over
/// it"). Owns the mapping's lifetime: dropping a `Heap` unmaps it.
pub struct Heap {
    mapper: Arc<dyn OsMapper>,
    base: usize,
    length: usize,
    control: ControlBlock,
    roots: Arc<dyn RootDirectory>,
    types: Arc<dyn TypeRegistry>,
    /// How long a sync region may wait for mutators to drain before the
    /// barrier reports `GcError::BarrierTimeout` (spec §5/§7). `None` (the
    /// default) waits unbounded.
    sync_wait_timeout: Option<Duration>,
}

impl Heap {
    /// Maps a fresh segment of `length` bytes, writes its header, and returns
    /// a `Heap` with the allocation frontier positioned right after the
    /// segment header and control block region (spec §6: "the control block
    /// lives at a fixed offset immediately following the segment header").
    pub fn create(
        mapper: Arc<dyn OsMapper>,
        length: usize,
        roots: Arc<dyn RootDirectory>,
        types: Arc<dyn TypeRegistry>,
    ) -> GcResult<Self> {
        crate::util::logger::try_init();
        let (base, mapped_length) = mapper.map(length)?;
        let header = SegmentHeader::new(mapped_length as u64);
        if (header.control_block_offset as usize) >= mapped_length {
            // SAFETY: `base`/`mapped_length` are exactly what `map` just
            // returned, and nothing else has attached to them yet.
            unsafe { mapper.unmap(base, mapped_length) };
            return Err(GcError::OutOfHeap);
        }
        // SAFETY: `base` names `mapped_length` freshly mapped, writable
        // bytes; `SEGMENT_HEADER_BYTES` of that range are reserved for the
        // header and untouched by anything else yet.
        unsafe {
            let slice = std::slice::from_raw_parts_mut(base as *mut u8, SEGMENT_HEADER_BYTES);
            header.write_to(slice);
        }
        let frontier = header.control_block_offset;
        let control = ControlBlock::new(base, mapped_length, frontier);
        Ok(Heap {
            mapper,
            base,
            length: mapped_length,
            control,
            roots,
            types,
            sync_wait_timeout: None,
        })
    }

    /// Convenience over [`Self::create`] that takes its segment length and
    /// sync-wait timeout from a [`GcConfig`] rather than bare arguments,
    /// matching the teacher crate's convention of threading a single
    /// options struct through construction.
    pub fn create_with_config(
        mapper: Arc<dyn OsMapper>,
        config: &GcConfig,
        roots: Arc<dyn RootDirectory>,
        types: Arc<dyn TypeRegistry>,
    ) -> GcResult<Self> {
        let mut heap = Self::create(mapper, config.heap_size_bytes, roots, types)?;
        heap.sync_wait_timeout = config.sync_wait_timeout;
        Ok(heap)
    }

    /// How long a sync region may wait before reporting
    /// `GcError::BarrierTimeout` (spec §5/§7). `None` waits unbounded.
    pub fn sync_wait_timeout(&self) -> Option<Duration> {
        self.sync_wait_timeout
    }

    /// Overrides the sync-wait timeout set at construction.
    pub fn set_sync_wait_timeout(&mut self, timeout: Option<Duration>) {
        self.sync_wait_timeout = timeout;
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn control_block(&self) -> &ControlBlock {
        &self.control
    }

    pub fn roots(&self) -> &dyn RootDirectory {
        self.roots.as_ref()
    }

    pub fn types(&self) -> &dyn TypeRegistry {
        self.types.as_ref()
    }

    /// Resolves an offset word naming an object *body* to that object's
    /// header, which lives immediately before the body in memory (spec §6:
    /// "object layout": header then body, contiguous).
    ///
    /// # Safety
    /// `ptr` must be a non-null, live offset word resolvable against this
    /// heap's mapping.
    pub unsafe fn header_at(&self, ptr: OffsetWord) -> &ObjectHeader {
        let body_addr = ptr.resolve(self.base);
        let header_addr = body_addr - OBJECT_HEADER_BYTES;
        &*(header_addr as *const ObjectHeader)
    }
}

impl HeaderLookup for Heap {
    unsafe fn header_of(&self, ptr: OffsetWord) -> &ObjectHeader {
        self.header_at(ptr)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // SAFETY: `base`/`length` are exactly the values this `Heap`
        // received from `mapper.map` in `create`, and no other `Heap` shares
        // them.
        unsafe { self.mapper.unmap(self.base, self.length) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roots::LocalRootDirectory;
    use crate::types::StaticTypeRegistry;
    use segment::AnonymousMmapMapper;

    fn test_heap(length: usize) -> Heap {
        Heap::create(
            Arc::new(AnonymousMmapMapper),
            length,
            Arc::new(LocalRootDirectory::new()),
            Arc::new(StaticTypeRegistry::new()),
        )
        .unwrap()
    }

    #[test]
    fn create_positions_frontier_after_header() {
        let heap = test_heap(1 << 16);
        assert!(heap.control_block().mapping_length >= 1 << 16);
    }

    #[test]
    fn create_with_config_uses_configured_heap_size() {
        let config = crate::options::GcConfig::new().with_heap_size_bytes(1 << 16);
        let heap = Heap::create_with_config(
            Arc::new(AnonymousMmapMapper),
            &config,
            Arc::new(LocalRootDirectory::new()),
            Arc::new(StaticTypeRegistry::new()),
        )
        .unwrap();
        assert!(heap.control_block().mapping_length >= 1 << 16);
    }

    #[test]
    fn header_at_resolves_just_before_body() {
        let heap = test_heap(1 << 16);
        let header_offset = heap.control_block().bump_frontier(OBJECT_HEADER_BYTES as u64).unwrap();
        let body = OffsetWord::new(
            header_offset as i64 + OBJECT_HEADER_BYTES as i64,
            crate::pointer::offset::PointerKind::Normal,
        );
        unsafe {
            let header_ptr =
                (heap.base() as i64 + header_offset as i64) as *mut ObjectHeader;
            ObjectHeader::init_at(
                header_ptr,
                OffsetWord::NULL,
                0,
                header::Color::White,
                false,
            );
            assert_eq!(heap.header_at(body).color(), header::Color::White);
        }
    }
}
