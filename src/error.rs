//! Error taxonomy (spec §7).
//!
//! Most of the crate deals with conditions that are either programming
//! errors (fail fast, as the original `dout`-guarded assertions did) or
//! conditions the collector recovers from internally without bothering the
//! caller. [`GcError`] only ever reaches a caller for [`GcError::OutOfHeap`]
//! and (if the binding asked for it) [`GcError::BarrierTimeout`] /
//! [`GcError::DeadPeer`]; see [`GcError::is_recoverable`].

use std::fmt;

/// Errors surfaced by the collector core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcError {
    /// The segment's magic number or format version did not match on
    /// attach. Fatal: the mapper must refuse to attach.
    SegmentMismatch,
    /// The allocator could not satisfy a request even after a full
    /// collection cycle. The only error that is routinely expected to
    /// reach a caller.
    OutOfHeap,
    /// A peer process died while holding a mutate or sync region. The
    /// barrier recovers by crediting the region back on the dead process's
    /// behalf; this variant is surfaced only for logging/telemetry.
    DeadPeer,
    /// A bounded sync-region wait exceeded its deadline. Treated
    /// identically to [`GcError::DeadPeer`] by policy (spec §7).
    BarrierTimeout,
    /// Dereferencing a null offset pointer. This is a programming error,
    /// not a runtime condition; in debug builds it is checked eagerly.
    NullDereference,
}

impl GcError {
    /// Whether the collector can continue operating after this error, as
    /// opposed to the segment being left in a state that requires the
    /// process to terminate cleanly without touching the segment further.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, GcError::SegmentMismatch)
    }
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcError::SegmentMismatch => {
                write!(f, "segment magic/version mismatch; refusing to attach")
            }
            GcError::OutOfHeap => write!(f, "heap exhausted even after a full collection"),
            GcError::DeadPeer => write!(f, "a peer process died while holding a region"),
            GcError::BarrierTimeout => write!(f, "timed out waiting for a barrier region"),
            GcError::NullDereference => write!(f, "dereferenced a null managed pointer"),
        }
    }
}

impl std::error::Error for GcError {}

pub type GcResult<T> = Result<T, GcError>;
