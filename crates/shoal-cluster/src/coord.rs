//! Facade over the coordination service, plus the global watcher.
//!
//! The service model is one-shot watches: every read re-arms the watch on
//! the object it touched, and the single global watcher re-issues the read
//! when the watch fires. Transient failures (`ConnectionLoss`,
//! `OperationTimeout`) are retried here until the operation lands; nothing
//! above this module ever sees them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use shoal_types::{Event, Member, NodeId};
use tracing::{debug, info, warn};
use zookeeper::{
    Acl, CreateMode, WatchedEvent, WatchedEventType, Watcher, ZkError, ZkResult, ZooKeeper,
    ZooKeeperExt,
};

use crate::error::{ClusterError, ClusterResult};
use crate::leave::LeaveChannel;
use crate::wakeup::Wakeup;

/// State shared between the dispatcher and the client library's threads.
///
/// The watcher is restricted to this struct: it may push one leave event,
/// re-arm a member watch and post a wakeup, nothing else. The member view
/// and the queue cursor are out of its reach.
pub(crate) struct Shared {
    pub leaves: LeaveChannel,
    pub wakeup: Wakeup,
    /// Per-connection session marker stamped into member records.
    session: AtomicU64,
    /// Set once the client reports the session closed; terminal.
    pub session_lost: AtomicBool,
    /// `<base>/member/`, the prefix member znode paths start with.
    member_prefix: String,
    retry_interval: Duration,
    /// Bound after connect; the watcher needs the handle to re-arm watches.
    handle: RwLock<Option<Arc<ZooKeeper>>>,
}

impl Shared {
    pub fn new(
        member_dir: String,
        member_cap: usize,
        retry_interval: Duration,
        wakeup: Wakeup,
    ) -> Self {
        Self {
            leaves: LeaveChannel::new(member_cap),
            wakeup,
            session: AtomicU64::new(fresh_session_marker()),
            session_lost: AtomicBool::new(false),
            member_prefix: format!("{member_dir}/"),
            retry_interval,
            handle: RwLock::new(None),
        }
    }

    pub fn bind_handle(&self, zk: Arc<ZooKeeper>) {
        *self.handle.write() = Some(zk);
    }

    pub fn session_marker(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// A session event marks a new incarnation of this connection as far as
    /// member records are concerned.
    pub fn refresh_session(&self) {
        let marker = fresh_session_marker();
        self.session.store(marker, Ordering::Release);
        debug!(session = marker, "session marker refreshed");
    }
}

fn fresh_session_marker() -> u64 {
    uuid::Uuid::new_v4().as_u128() as u64
}

/// The single watcher the client library invokes for every armed watch.
pub(crate) struct ClusterWatcher {
    pub shared: Arc<Shared>,
}

impl Watcher for ClusterWatcher {
    fn handle(&self, event: WatchedEvent) {
        debug!(path = ?event.path, event_type = ?event.event_type, "watch fired");
        let path = event.path.as_deref().unwrap_or("");
        match event.event_type {
            // The session identity changes with the connection, not with
            // any znode; refresh the marker and nothing else.
            WatchedEventType::None => {
                self.shared.refresh_session();
                debug!(state = ?event.keeper_state, "session event");
            }
            // The queue runs on data and exists watches, not child watches.
            WatchedEventType::NodeChildrenChanged => {}
            WatchedEventType::NodeCreated | WatchedEventType::NodeDataChanged
                if path.starts_with(&self.shared.member_prefix) =>
            {
                self.rearm_member_watch(path);
                self.shared.wakeup.post();
            }
            WatchedEventType::NodeDeleted => {
                let Some(segment) = path.strip_prefix(&self.shared.member_prefix) else {
                    // Not a member znode; treat it like any other event.
                    self.shared.wakeup.post();
                    return;
                };
                match NodeId::new(segment) {
                    Ok(node) => {
                        info!(node = %node, "member znode deleted, queueing leave");
                        let leaver = Member {
                            node,
                            session: 0,
                            joined: true,
                        };
                        self.shared.leaves.push(Event::leave(leaver));
                        self.shared.wakeup.post();
                    }
                    Err(err) => warn!(%err, "ignoring deletion of unparseable member znode"),
                }
            }
            _ => self.shared.wakeup.post(),
        }
    }
}

impl ClusterWatcher {
    /// Watches are one-shot; re-issuing the exists call is what re-arms one.
    fn rearm_member_watch(&self, path: &str) {
        let Some(zk) = self.shared.handle.read().clone() else {
            return;
        };
        loop {
            match zk.exists(path, true) {
                Err(ZkError::ConnectionLoss) | Err(ZkError::OperationTimeout) => {
                    thread::sleep(self.shared.retry_interval);
                }
                _ => return,
            }
        }
    }
}

/// Thin retry-wrapping facade over the coordination client.
///
/// Reads arm the global watch on the object they touch; deletes and sets use
/// version `-1` ("any").
#[derive(Clone)]
pub(crate) struct CoordClient {
    zk: Arc<ZooKeeper>,
    retry_interval: Duration,
}

impl CoordClient {
    pub fn new(zk: Arc<ZooKeeper>, retry_interval: Duration) -> Self {
        Self { zk, retry_interval }
    }

    fn retry<T>(&self, what: &str, mut op: impl FnMut() -> ZkResult<T>) -> ZkResult<T> {
        loop {
            match op() {
                Err(err @ (ZkError::ConnectionLoss | ZkError::OperationTimeout)) => {
                    debug!(op = what, ?err, "transient coordination error, retrying");
                    thread::sleep(self.retry_interval);
                }
                other => return other,
            }
        }
    }

    /// Create-if-absent for the persistent parents; an existing node is
    /// success.
    pub fn ensure_parent(&self, path: &str) -> ClusterResult<()> {
        self.retry("ensure", || self.zk.ensure_path(path))
            .map_err(ClusterError::from)
    }

    /// Sequential create under `dir` (which ends with `/`); returns the full
    /// path the service assigned.
    pub fn create_sequential(&self, dir: &str, data: &[u8]) -> ClusterResult<String> {
        let created = self.retry("create-seq", || {
            self.zk.create(
                dir,
                data.to_vec(),
                Acl::open_unsafe().clone(),
                CreateMode::PersistentSequential,
            )
        })?;
        Ok(created)
    }

    pub fn create_ephemeral(&self, path: &str, data: &[u8]) -> ClusterResult<()> {
        self.retry("create-ephemeral", || {
            self.zk.create(
                path,
                data.to_vec(),
                Acl::open_unsafe().clone(),
                CreateMode::Ephemeral,
            )
        })?;
        Ok(())
    }

    /// Data read; arms the global data watch. `None` means no node.
    pub fn get_data(&self, path: &str) -> ClusterResult<Option<Vec<u8>>> {
        match self.retry("get", || self.zk.get_data(path, true)) {
            Ok((data, _stat)) => Ok(Some(data)),
            Err(ZkError::NoNode) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn set_data(&self, path: &str, data: &[u8]) -> ClusterResult<()> {
        self.retry("set", || self.zk.set_data(path, data.to_vec(), None))?;
        Ok(())
    }

    /// Existence probe; arms the global exists watch whether or not the node
    /// is there (an absent node reposts on creation).
    pub fn exists(&self, path: &str) -> ClusterResult<bool> {
        match self.retry("exists", || self.zk.exists(path, true)) {
            Ok(_stat) => Ok(true),
            Err(ZkError::NoNode) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Child listing; arms the global child watch.
    pub fn children(&self, path: &str) -> ClusterResult<Vec<String>> {
        self.retry("children", || self.zk.get_children(path, true))
            .map_err(ClusterError::from)
    }

    /// Delete at any version. `NoNode` is surfaced to the caller.
    pub fn delete(&self, path: &str) -> ClusterResult<()> {
        self.retry("delete", || self.zk.delete(path, None))
            .map_err(ClusterError::from)
    }
}
