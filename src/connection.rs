use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-proxy count of live tunnel connections.
///
/// The supervisor reads this during shutdown to decide when draining is
/// complete; each accepted connection holds a [`ConnectionGuard`] for its
/// whole lifetime, so the count reaching zero means no connection state
/// remains allocated.
#[derive(Clone, Debug, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and return its guard.
    pub fn guard(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            decremented: false,
        }
    }

    /// Current number of live connections.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// RAII guard that keeps the tracker's count accurate even when a serve task
/// unwinds or is cancelled mid-tunnel.
pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
    decremented: bool,
}

impl ConnectionGuard {
    /// Manually release the guard before drop.
    pub fn decrement(&mut self) {
        if !self.decremented {
            self.active.fetch_sub(1, Ordering::Relaxed);
            self.decremented = true;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.decrement();
    }
}
