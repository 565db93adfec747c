//! Runtime configuration (added, ambient stack). Grounded in the backing
//! framework's `util::options` module: a plain struct with a `Default`
//! impl and explicit setters, rather than a builder-of-builders or a
//! config-file parser this crate has no use for yet.

use std::time::Duration;

/// Tunables for a [`crate::heap::Heap`] instance.
#[derive(Clone, Debug)]
pub struct GcConfig {
    /// Total length of the managed segment to request from the
    /// [`crate::heap::segment::OsMapper`].
    pub heap_size_bytes: usize,
    /// How long a sync region may wait for mutators to drain before the
    /// barrier treats the wait as a dead peer (spec §7: `BarrierTimeout` is
    /// treated as `DeadPeer`). `None` means wait unbounded, which is the
    /// default (spec §5: "Default is unbounded wait").
    pub sync_wait_timeout: Option<Duration>,
    /// Whether a `BarrierTimeout`/`DeadPeer` recovery should be logged at
    /// `warn` level (the default) or `error` level, for deployments that
    /// want dead-peer events to page someone.
    pub treat_dead_peer_as_error: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            heap_size_bytes: 64 << 20, // 64 MiB
            sync_wait_timeout: None,
            treat_dead_peer_as_error: false,
        }
    }
}

impl GcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heap_size_bytes(mut self, bytes: usize) -> Self {
        self.heap_size_bytes = bytes;
        self
    }

    pub fn with_sync_wait_timeout(mut self, timeout: Duration) -> Self {
        self.sync_wait_timeout = Some(timeout);
        self
    }
}
