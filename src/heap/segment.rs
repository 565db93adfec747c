//! The persisted segment layout (spec §6) and the `OsMapper` collaborator
//! interface (spec §1: explicitly out of scope as a full implementation,
//! but named here since this crate owns the byte format it reads and
//! writes).

use crate::error::{GcError, GcResult};
use crate::util::constants::{SEGMENT_FORMAT_VERSION, SEGMENT_HEADER_BYTES, SEGMENT_MAGIC};

/// The fixed header at the start of every managed segment (spec §6:
/// "Persisted heap layout"). All multi-byte fields are little-endian.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic: u64,
    pub format_version: u32,
    pub segment_length: u64,
    pub control_block_offset: u64,
    pub root_directory_offset: u64,
    pub type_registry_offset: u64,
}

impl SegmentHeader {
    pub fn new(segment_length: u64) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_length,
            control_block_offset: SEGMENT_HEADER_BYTES as u64,
            root_directory_offset: 0,
            type_registry_offset: 0,
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= SEGMENT_HEADER_BYTES, "buffer too small for segment header");
        let mut cursor = 0;
        macro_rules! put {
            ($bytes:expr) => {{
                let bytes = $bytes;
                buf[cursor..cursor + bytes.len()].copy_from_slice(&bytes);
                cursor += bytes.len();
            }};
        }
        put!(self.magic.to_le_bytes());
        put!(self.format_version.to_le_bytes());
        put!(self.segment_length.to_le_bytes());
        put!(self.control_block_offset.to_le_bytes());
        put!(self.root_directory_offset.to_le_bytes());
        put!(self.type_registry_offset.to_le_bytes());
        debug_assert_eq!(cursor, SEGMENT_HEADER_BYTES);
    }

    /// Parses a segment header from the front of `buf`, refusing to attach
    /// on a magic or version mismatch (spec §6/§7: `GcError::SegmentMismatch`
    /// is the only fatal error in the taxonomy).
    pub fn read_from(buf: &[u8]) -> GcResult<Self> {
        if buf.len() < SEGMENT_HEADER_BYTES {
            return Err(GcError::SegmentMismatch);
        }
        let mut cursor = 0;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let mut bytes = [0u8; N];
                bytes.copy_from_slice(&buf[cursor..cursor + N]);
                cursor += N;
                <$ty>::from_le_bytes(bytes)
            }};
        }
        let magic = take!(u64);
        let format_version = take!(u32);
        let segment_length = take!(u64);
        let control_block_offset = take!(u64);
        let root_directory_offset = take!(u64);
        let type_registry_offset = take!(u64);

        if magic != SEGMENT_MAGIC || format_version != SEGMENT_FORMAT_VERSION {
            return Err(GcError::SegmentMismatch);
        }

        Ok(SegmentHeader {
            magic,
            format_version,
            segment_length,
            control_block_offset,
            root_directory_offset,
            type_registry_offset,
        })
    }
}

/// Produces a base address and length for the managed segment (spec §1:
/// "OS mapper"). Out of scope as a full implementation — real bindings
/// supply named shared memory, file-backed mappings with a persistence
/// policy, huge pages, NUMA placement, etc. This crate only needs the
/// narrow contract.
pub trait OsMapper: Send + Sync {
    /// Creates or attaches a managed segment of at least `length` bytes,
    /// returning its base address and actual mapped length.
    fn map(&self, length: usize) -> GcResult<(usize, usize)>;

    /// Unmaps a previously mapped segment.
    ///
    /// # Safety
    /// `base`/`length` must be exactly the values returned by a prior,
    /// still-live call to [`Self::map`].
    unsafe fn unmap(&self, base: usize, length: usize);
}

/// A minimal, anonymous (non-persisted, single-machine) mapper used for
/// tests and single-process embedding. Real multi-process deployments
/// attach a named shared mapping instead (out of scope, spec §1).
pub struct AnonymousMmapMapper;

impl OsMapper for AnonymousMmapMapper {
    fn map(&self, length: usize) -> GcResult<(usize, usize)> {
        // SAFETY: standard anonymous, private-or-shared mmap usage; we
        // check the sentinel return value below before trusting the
        // pointer.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(GcError::OutOfHeap);
        }
        Ok((ptr as usize, length))
    }

    unsafe fn unmap(&self, base: usize, length: usize) {
        libc::munmap(base as *mut libc::c_void, length);
    }
}
