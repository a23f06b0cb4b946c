//! Public SDK surface for Keepsake.
//!
//! This crate re-exports the sync engine and its building blocks and
//! provides a small initialization helper to keep consumer setup consistent.

mod event_bus;

/// Re-export for convenience.
pub use keepsake_config as config;
/// Re-export for convenience.
pub use keepsake_protocol as protocol;
/// Re-export for convenience.
pub use keepsake_sync as sync;

pub use event_bus::EventBus;
pub use keepsake_sync::{Delivery, LocalUser, SyncError, SyncSession, SyncSessionBuilder};

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// Timestamps carry milliseconds and `RUST_LOG` is honored. This is a no-op
/// without the feature; binaries call it early in startup.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::builder()
            .format_timestamp_millis()
            .parse_default_env()
            .try_init();
    }
}
