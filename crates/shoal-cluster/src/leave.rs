//! Side-channel of pending leave events.

use crossbeam::queue::ArrayQueue;
use shoal_types::Event;
use tracing::warn;

/// Bounded lock-free ring of LEAVE events discovered by the watcher.
///
/// The watcher thread is the only producer and the dispatcher the only
/// consumer. Capacity equals the cluster member cap, so the ring can hold one
/// leave for every possible member at once; a push onto a full ring is
/// dropped with a warning.
pub(crate) struct LeaveChannel {
    ring: ArrayQueue<Event>,
}

impl LeaveChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ArrayQueue::new(capacity),
        }
    }

    pub fn push(&self, event: Event) {
        if let Err(event) = self.ring.push(event) {
            warn!(node = %event.sender.node, "leave channel full, dropping leave event");
        }
    }

    pub fn pop(&self) -> Option<Event> {
        self.ring.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }
}
