//! `mpgc-core`: the mutator/collector coordination core of a multi-process
//! garbage collector.
//!
//! The managed heap lives in a shared, memory-mapped segment visible to many
//! cooperating processes at once. Each process independently allocates,
//! mutates, and drops references to managed objects; one collector traces
//! liveness across all attached processes without stopping them for long
//! pauses and without any single process owning the heap.
//!
//! This crate covers three tightly coupled subsystems:
//!
//! * the managed pointer family ([`pointer`]) — a tagged, heap-relative
//!   address with three observable flavors (strong, weak, external) and the
//!   write barrier that links mutation to collection;
//! * the generational mark/sweep state machine ([`collector`], [`heap`]) —
//!   per-object color bits, the tri-color invariant, and the phases that
//!   drive an attached heap from Idle through Marking and Sweeping and back;
//! * the mutate/sync barrier ([`sync::barrier`]) — a lock-free coordination
//!   primitive serializing collector phase transitions against the entry and
//!   exit of mutator critical regions.
//!
//! Shared-segment creation (`OsMapper`), per-type layout ([`types`]) and the
//! root set ([`roots`]) are each defined here only as the narrow trait this
//! crate consumes; high-level containers, CLI tooling, and a production
//! concurrent hash map backing the root directory are out of scope.

pub mod alloc;
pub mod collector;
pub mod error;
pub mod heap;
pub mod options;
pub mod pointer;
pub mod roots;
pub mod sync;
pub mod types;
mod util;

pub use alloc::Allocator;
pub use collector::Collector;
pub use error::{GcError, GcResult};
pub use heap::Heap;
pub use options::GcConfig;
pub use pointer::{ExternalPtr, OffsetPtr, OffsetWord, PointerKind, StrongPtr, WeakPtr};
pub use roots::RootDirectory;
pub use types::{FieldDescriptor, FieldKind, TypeRegistry};

/// Initializes the crate's built-in diagnostics (see [`util::logger`]).
///
/// Bindings that register their own `log` backend, or that built this crate
/// with the `builtin_env_logger` feature disabled, do not need to call this;
/// it is also called automatically the first time a [`Heap`] is created.
pub fn init_logging() {
    util::logger::try_init();
}
