//! The managed pointer family (spec §4.1/§4.5, components C1 and C6): a
//! shared tagged wire representation ([`offset`]) with three user-facing
//! flavors built on top.

pub mod external;
pub mod offset;
pub mod strong;
pub mod weak;

pub use external::ExternalPtr;
pub use offset::{OffsetPtr, OffsetWord, PointerKind};
pub use strong::StrongPtr;
pub use weak::WeakPtr;
