//! Dispatcher: one wakeup, one pop, one handler.
//!
//! Handlers run on the thread driving the loop. A handler that cannot make
//! progress yet steps the cursor back and returns; the watch already armed
//! on the slot wakes the loop again once the slot changes.

use std::sync::atomic::Ordering;
use std::thread;

use shoal_types::{Event, EventKind, JoinResult, Member, NodeId};
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::error::{ClusterError, ClusterResult};

/// Daemon-side callbacks invoked by the dispatcher.
///
/// All callbacks run on the thread driving [`Driver::run`] or
/// [`Driver::process_one`]. They receive snapshots and must not re-enter the
/// driver; work started by a callback reports back through the driver's own
/// API between dispatch steps (`unblock` after `block_handler`, for
/// instance).
pub trait ClusterDelegate: Send {
    /// Admission check, asked of the master for every join request.
    fn check_join(&self, node: &NodeId, opaque: &[u8]) -> JoinResult;

    /// A join response has been applied; `members` is the full snapshot in
    /// ascending node id order.
    fn join_handler(&self, node: &NodeId, members: &[Member], result: JoinResult, opaque: &[u8]);

    /// A member left; `members` is the post-removal snapshot.
    fn leave_handler(&self, node: &NodeId, members: &[Member]);

    /// A blocking event reached its slot. Return true to engage the local
    /// block flag; it is released when the sender publishes its result via
    /// unblock (or leaves the cluster without one).
    fn block_handler(&self, node: &NodeId) -> bool;

    /// A notification reached its slot in the total order.
    fn notify_handler(&self, node: &NodeId, msg: &[u8]);
}

/// What the loop should do after a dispatch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The driver has left the cluster (master transfer); the embedding
    /// daemon is expected to exit and be restarted.
    Shutdown,
}

/// How a pop interacts with the leave channel and the block gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PopMode {
    /// Normal dispatch: pending leaves first, then the gated queue.
    Dispatch,
    /// Unblock path: bypass both and read the own BLOCK at the head.
    Unblock,
}

impl Driver {
    /// Handle at most one event. `Flow::Continue` with no side effects means
    /// nothing was deliverable.
    pub fn process_one(&mut self) -> ClusterResult<Flow> {
        if self.shared.session_lost.load(Ordering::Acquire) {
            return Err(ClusterError::SessionLost);
        }
        let event = match self.next_event(PopMode::Dispatch)? {
            Some(event) => event,
            None => return Ok(Flow::Continue),
        };
        match event.kind {
            EventKind::JoinRequest => self.handle_join_request(event),
            EventKind::JoinResponse => {
                self.handle_join_response(event)?;
                Ok(Flow::Continue)
            }
            EventKind::Leave => {
                self.handle_leave(event);
                Ok(Flow::Continue)
            }
            EventKind::Block => {
                self.handle_block(event);
                Ok(Flow::Continue)
            }
            EventKind::Notify => {
                self.handle_notify(event);
                Ok(Flow::Continue)
            }
        }
    }

    /// Pop the next deliverable event.
    ///
    /// Pending leaves are delivered ahead of the queue so membership keeps
    /// moving while the cluster is blocked; the one exception is the unblock
    /// path, which must reach its own BLOCK at the head.
    pub(crate) fn next_event(&mut self, mode: PopMode) -> ClusterResult<Option<Event>> {
        if mode == PopMode::Dispatch {
            if let Some(leave) = self.shared.leaves.pop() {
                // The leaver may be sitting on the head as a blocking event
                // it can no longer rewrite; step over it or the cluster
                // waits on that slot forever.
                let head = self.queue.read_head()?;
                let head_present = head.is_some();
                if let Some(head) = head {
                    if head.is_blocking() && head.sender.node == leave.sender.node {
                        info!(
                            pos = self.queue.pos(),
                            node = %leave.sender.node,
                            "queue head was blocked by the leaver, skipping it"
                        );
                        self.queue.skip_head()?;
                        if head.kind == EventKind::Block && self.blocking.is_blocked() {
                            debug!("releasing block abandoned by the leaver");
                            self.blocking.release();
                        }
                    }
                }
                // More work pending: further leaves, or a readable head.
                if !self.shared.leaves.is_empty() || head_present {
                    self.shared.wakeup.post();
                }
                self.leaves_delivered += 1;
                return Ok(Some(leave));
            }
            if self.blocking.is_blocked() {
                // The gate lifts when the originator rewrites the head in
                // place: the slot the cursor is parked on stops being a
                // blocking event. Until then nothing but leaves flows.
                match self.queue.read_head()? {
                    Some(head) if !head.is_blocking() => {
                        debug!("blocked head was rewritten, lifting the gate");
                        self.blocking.release();
                    }
                    _ => return Ok(None),
                }
            }
        }
        let event = self.queue.pop()?;
        if event.is_some() {
            self.events_delivered += 1;
        }
        Ok(event)
    }

    fn handle_join_request(&mut self, mut event: Event) -> ClusterResult<Flow> {
        debug!(sender = %event.sender.node, joined = event.sender.joined, "join request");
        if !self.is_master()? {
            // Await the master acking the request.
            self.queue.step_back();
            return Ok(Flow::Continue);
        }
        let result = self.delegate.check_join(&event.sender.node, &event.payload);
        event.join_result = result;
        event.kind = EventKind::JoinResponse;
        event.sender.joined = true;
        self.queue.rewrite_head(&event)?;
        if result == JoinResult::MasterTransfer {
            warn!(
                sender = %event.sender.node,
                "admission requires master transfer, leaving the cluster"
            );
            self.leave()?;
            return Ok(Flow::Shutdown);
        }
        debug!("acting as master");
        Ok(Flow::Continue)
    }

    fn handle_join_response(&mut self, event: Event) -> ClusterResult<()> {
        debug!(sender = %event.sender.node, result = ?event.join_result, "join response");
        let sender_is_local = event.sender.node == self.local.node;
        if self.is_master()? && !sender_is_local {
            // The joiner installs its own ephemeral member znode; wait for
            // it, so the deletion watch armed below has something to fire
            // on when the member goes away.
            if !self.await_member_znode(&event.sender.node)? {
                warn!(
                    node = %event.sender.node,
                    "member znode never appeared, dropping join response"
                );
                return Ok(());
            }
        }
        if sender_is_local {
            self.load_members()?;
        }
        if event.join_result == JoinResult::MasterTransfer {
            // Only the joining node survives a master transfer; start over.
            self.members.clear();
        }
        self.members.insert(event.sender.clone());
        match event.join_result {
            JoinResult::Success | JoinResult::JoinLater | JoinResult::MasterTransfer => {
                let path = self.config.member_path(&event.sender.node);
                if sender_is_local {
                    info!(path = %path, "installing own member znode");
                    self.coord.create_ephemeral(&path, &event.sender.encode_vec())?;
                } else {
                    // Arm the deletion watch that will announce this
                    // member's leave.
                    self.coord.exists(&path)?;
                }
            }
            JoinResult::Fail => {}
        }
        let members = self.members.snapshot();
        self.delegate
            .join_handler(&event.sender.node, &members, event.join_result, &event.payload);
        Ok(())
    }

    fn await_member_znode(&self, node: &NodeId) -> ClusterResult<bool> {
        let path = self.config.member_path(node);
        let mut attempts = self.config.member_create_attempts();
        loop {
            if self.coord.exists(&path)? {
                return Ok(true);
            }
            if attempts == 0 {
                return Ok(false);
            }
            attempts -= 1;
            thread::sleep(self.config.member_create_interval());
        }
    }

    /// Bulk-load the membership from `member/*`. A child that vanishes
    /// between the listing and the read is skipped; so is one whose record
    /// does not decode.
    fn load_members(&mut self) -> ClusterResult<()> {
        let member_dir = self.config.member_dir();
        for child in self.coord.children(&member_dir)? {
            let path = format!("{member_dir}/{child}");
            match self.coord.get_data(&path)? {
                Some(data) => match Member::decode_vec(&data) {
                    Ok(member) => self.members.insert(member),
                    Err(err) => warn!(path = %path, %err, "skipping undecodable member record"),
                },
                None => {}
            }
        }
        debug!(members = self.members.len(), "loaded membership");
        Ok(())
    }

    fn handle_leave(&mut self, event: Event) {
        let Some(member) = self.members.remove(&event.sender.node) else {
            debug!(node = %event.sender.node, "leave for unknown node, ignoring");
            return;
        };
        info!(node = %member.node, remaining = self.members.len(), "member left");
        let members = self.members.snapshot();
        self.delegate.leave_handler(&member.node, &members);
    }

    fn handle_block(&mut self, event: Event) {
        debug!(sender = %event.sender.node, "block");
        // Stay on this slot; the unblock rewrite will be reread here as the
        // published NOTIFY.
        self.queue.step_back();
        if self.delegate.block_handler(&event.sender.node) {
            self.blocking.engage();
        }
    }

    fn handle_notify(&mut self, event: Event) {
        debug!(sender = %event.sender.node, len = event.payload.len(), "notify");
        self.delegate.notify_handler(&event.sender.node, &event.payload);
    }

    /// The smallest known node id is the master. With nothing known locally,
    /// bootstrap: master iff the member directory is empty too.
    pub(crate) fn is_master(&self) -> ClusterResult<bool> {
        if self.members.is_empty() {
            return Ok(self.coord.children(&self.config.member_dir())?.is_empty());
        }
        Ok(self
            .members
            .first()
            .map(|member| member.node == self.local.node)
            .unwrap_or(false))
    }
}
