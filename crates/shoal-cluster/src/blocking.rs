//! Block-flag state for the distributed critical section.

use std::sync::atomic::{AtomicBool, Ordering};

/// While engaged, the dispatcher delivers nothing but LEAVE events; the
/// whole cluster sits on the blocking event's slot until its originator
/// rewrites it in place.
#[derive(Debug, Default)]
pub(crate) struct BlockingController {
    blocked: AtomicBool,
}

impl BlockingController {
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Engaging twice without a release is a protocol bug: at most one
    /// blocking event can be in flight.
    pub fn engage(&self) {
        let was_blocked = self.blocked.swap(true, Ordering::AcqRel);
        assert!(!was_blocked, "block flag engaged while already blocked");
    }

    pub fn release(&self) {
        self.blocked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engage_release_cycle() {
        let blocking = BlockingController::default();
        assert!(!blocking.is_blocked());
        blocking.engage();
        assert!(blocking.is_blocked());
        blocking.release();
        assert!(!blocking.is_blocked());
        blocking.engage();
        assert!(blocking.is_blocked());
    }

    #[test]
    #[should_panic(expected = "already blocked")]
    fn double_engage_panics() {
        let blocking = BlockingController::default();
        blocking.engage();
        blocking.engage();
    }
}
