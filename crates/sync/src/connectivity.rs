//! Connectivity hint used to pace the drain loop.
//!
//! The signal is advisory. The engine stays correct if it dispatches while
//! offline: every call fails transient and is retried with backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Fixed-online signal for hosts without a connectivity source.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl ConnectivitySignal for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Shared flag the host process flips from its own network monitoring.
#[derive(Debug, Clone)]
pub struct SharedConnectivity {
    online: Arc<AtomicBool>,
}

impl SharedConnectivity {
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(initially_online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

impl Default for SharedConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivitySignal for SharedConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_flag_round_trips() {
        let signal = SharedConnectivity::new(true);
        assert!(signal.is_online());
        signal.set_online(false);
        assert!(!signal.is_online());
        signal.set_online(true);
        assert!(signal.is_online());
    }
}
