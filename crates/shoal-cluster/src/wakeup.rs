//! Coalescing wakeup edge between the watcher thread and the dispatcher.

use crossbeam::channel::{bounded, Receiver, Sender};

/// Posting never blocks; while a wakeup is already pending, further posts
/// coalesce into it. The dispatcher drains one token per dispatch step and
/// handlers repost when more work remains.
#[derive(Clone)]
pub(crate) struct Wakeup {
    tx: Sender<()>,
}

impl Wakeup {
    pub fn post(&self) {
        // Full channel: a wakeup is already pending.
        let _ = self.tx.try_send(());
    }
}

pub(crate) fn channel() -> (Wakeup, Receiver<()>) {
    let (tx, rx) = bounded(1);
    (Wakeup { tx }, rx)
}
