//! DispatchGate - per-process switch closed while this instance is isolated
//! from the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DispatchGate {
    open: Arc<AtomicBool>,
}

impl Default for DispatchGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchGate {
    /// A new gate is open.
    pub fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the gate. Returns whether it was open.
    pub fn suspend(&self) -> bool {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        if was_open {
            warn!("dispatch suspended");
        }
        was_open
    }

    /// Reopen the gate. Returns whether it was closed.
    pub fn resume(&self) -> bool {
        let was_closed = !self.open.swap(true, Ordering::SeqCst);
        if was_closed {
            info!("dispatch resumed");
        }
        was_closed
    }
}
