//! Online/offline monitor shared by the session and the offline queue.

use log::info;
use std::sync::Arc;
use tokio::sync::watch;

/// Watch-backed connectivity flag.
#[derive(Clone, Debug)]
pub struct Connectivity {
    sender: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Record the current connectivity; returns true when it flipped.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("connectivity changed (online={})", online);
        }
        changed
    }

    /// Current connectivity as last reported.
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Receiver notified on every flip.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
