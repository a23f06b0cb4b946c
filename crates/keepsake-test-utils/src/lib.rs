//! Test helpers shared across Keepsake crates.

pub mod backend;
pub mod channel;
pub mod enricher;
pub mod fixtures;
pub mod notifier;
pub mod sink;

pub use backend::InMemoryBackend;
pub use channel::LoopbackChannel;
pub use enricher::StaticEnricher;
pub use fixtures::{active_connection, memory, memory_at, pending_connection};
pub use notifier::RecordingNotifier;
pub use sink::RecordingSink;

use std::time::Duration;

/// Poll `condition` every 10ms until it holds or two seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
