//! Graceful-shutdown signal shared by every connection handler.

use tokio::sync::broadcast;

/// Listens for a broadcast shutdown notification, tracking whether it
/// has already fired so callers can cheaply ask `is_shutdown()` from a
/// `tokio::select!` arm without consuming the channel twice.
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            is_shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Waits for the shutdown signal, returning immediately if it was
    /// already received.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }

        // A lagged receiver still means "shutdown happened", so either
        // outcome of `recv()` other than the channel being dropped
        // before anyone ever sent on it is treated as the signal.
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
