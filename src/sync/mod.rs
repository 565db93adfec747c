//! Cross-process coordination (spec §4.3/§4.4, components C4 and C5).

pub mod barrier;
pub mod write_barrier;
