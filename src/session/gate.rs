//! Session generation gate

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identity and liveness of one session generation
///
/// Every callback that can send media or schedule playback holds an
/// `Arc<SessionGate>` and checks [`is_active`](Self::is_active) right before
/// acting. A gate is opened once when its connection opens and closed once
/// at teardown; a new connection attempt always gets a new gate.
#[derive(Debug)]
pub struct SessionGate {
    id: u64,
    active: AtomicBool,
}

impl SessionGate {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            active: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Returns whether the gate was open
    pub fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }
}
