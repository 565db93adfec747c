//! This module provides a built-in logger implementation.
//!
//! The built-in logger uses the `env_logger` crate and is enabled by the
//! Cargo feature "builtin_env_logger", which is on by default. When enabled,
//! it is initialized by [`crate::heap::Heap::create`] (and by
//! [`crate::init_logging`] for callers that never create a `Heap` directly)
//! and shows logs of level INFO or lower (the lower, the more important)
//! unless overridden by the `RUST_LOG` environment variable.
//!
//! This mirrors the original implementation's `dout` macro
//! (`PHEAPDEBUG`-gated `std::cout` tracing) with the idiomatic Rust
//! equivalent: a binding can disable the Cargo feature and register its own
//! `log` backend to integrate with a host VM's logging.

/// Attempt to init an env_logger for the collector. Does nothing if the
/// "builtin_env_logger" feature is disabled.
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );

            match result {
                Ok(()) => {
                    log::debug!("mpgc-core initialized the logger.");
                }
                Err(e) => {
                    // log::SetLoggerError can only mean the logger was already initialized.
                    log::debug!("mpgc-core did not initialize the built-in env_logger: {e}");
                }
            }
        } else {
            log::debug!("mpgc-core did not initialize the built-in env_logger; the Cargo feature \"builtin_env_logger\" is disabled.");
        }
    }
}
