//! Coalesced "something changed" notifications.
//!
//! A [`Signal`] is a single-slot notification: any number of
//! [`Signal::notify`] calls made before a receiver wakes up collapse into one
//! wakeup, the producer never blocks, and a receiver is never left without a
//! wakeup once something changed after it last looked.

use std::sync::Arc;
use tokio::sync::watch;

/// Producer side of a coalesced signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<u64>>,
}

/// Consumer side of a coalesced signal.
#[derive(Debug, Clone)]
pub struct SignalReceiver {
    rx: watch::Receiver<u64>,
}

impl Signal {
    /// Create a new signal with no pending notification.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Mark the signal as pending. Never blocks, never fails.
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Create a receiver. Notifications sent before this call are not seen.
    pub fn subscribe(&self) -> SignalReceiver {
        SignalReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of notifications sent so far.
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalReceiver {
    /// Wait until the signal is pending and consume it.
    ///
    /// Returns `false` once every [`Signal`] handle has been dropped.
    pub async fn changed(&mut self) -> bool {
        match self.rx.changed().await {
            Ok(()) => {
                self.rx.borrow_and_update();
                true
            }
            Err(_) => false,
        }
    }

    /// Whether a notification is pending, without consuming it.
    pub fn is_pending(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}
