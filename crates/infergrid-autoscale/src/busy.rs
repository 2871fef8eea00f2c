//! Skip-don't-wait guard for the scaling cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag claimed by the cycle in flight.
#[derive(Debug, Default, Clone)]
pub struct BusyFlag {
    busy: Arc<AtomicBool>,
}

impl BusyFlag {
    /// Claim the flag, or return `None` if a cycle already holds it.
    pub fn try_claim(&self) -> Option<BusyGuard> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(BusyGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    pub fn is_claimed(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the flag when dropped, on every exit path of the cycle.
#[derive(Debug)]
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
