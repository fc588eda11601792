//! Public driver surface.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use shoal_types::{Event, EventKind, Member, NodeId, MAX_EVENT_BUF_SIZE};
use tracing::{debug, error, info};
use zookeeper::{ZkState, ZooKeeper};

use crate::blocking::BlockingController;
use crate::config::ClusterConfig;
use crate::coord::{ClusterWatcher, CoordClient, Shared};
use crate::dispatch::{ClusterDelegate, Flow, PopMode};
use crate::error::{ClusterError, ClusterResult};
use crate::members::MemberSet;
use crate::queue::EventQueue;
use crate::wakeup;

/// Point-in-time driver counters.
#[derive(Debug, Clone, Serialize)]
pub struct DriverStats {
    pub cursor: i64,
    pub members: usize,
    pub blocked: bool,
    pub pending_leaves: usize,
    pub events_delivered: u64,
    pub leaves_delivered: u64,
}

/// The cluster driver: one value owning the coordination handle, the event
/// cursor, the member view and the block flag.
///
/// All mutation happens through `&mut self` on the thread driving
/// [`Driver::run`]; the only concurrent party is the client library's
/// watcher, which is confined to the leave side-channel and the wakeup
/// signal.
pub struct Driver {
    pub(crate) config: ClusterConfig,
    pub(crate) coord: CoordClient,
    pub(crate) shared: Arc<Shared>,
    pub(crate) wakeup_rx: Receiver<()>,
    pub(crate) queue: EventQueue,
    pub(crate) members: MemberSet,
    pub(crate) blocking: BlockingController,
    pub(crate) local: Member,
    pub(crate) delegate: Box<dyn ClusterDelegate>,
    pub(crate) events_delivered: u64,
    pub(crate) leaves_delivered: u64,
}

impl Driver {
    /// Connect to the coordination service (`connect` is a comma-separated
    /// list of `host:port` pairs) and prepare the znode layout. The driver
    /// is not a cluster member until [`Driver::join`] completes the
    /// handshake.
    pub fn connect(
        connect: &str,
        config: ClusterConfig,
        delegate: Box<dyn ClusterDelegate>,
    ) -> ClusterResult<Self> {
        config.validate()?;
        let (wakeup, wakeup_rx) = wakeup::channel();
        let shared = Arc::new(Shared::new(
            config.member_dir(),
            config.member_cap,
            config.retry_interval(),
            wakeup,
        ));
        let watcher = ClusterWatcher {
            shared: Arc::clone(&shared),
        };
        let zk = Arc::new(ZooKeeper::connect(
            connect,
            config.session_timeout(),
            watcher,
        )?);
        shared.bind_handle(Arc::clone(&zk));
        install_state_listener(&zk, &shared);
        info!(connect, base = %config.base, "connected to coordination service");

        let coord = CoordClient::new(Arc::clone(&zk), config.retry_interval());
        coord.ensure_parent(&config.base)?;
        coord.ensure_parent(&config.queue_dir())?;
        coord.ensure_parent(&config.member_dir())?;

        let queue = EventQueue::new(coord.clone(), config.queue_dir(), shared.wakeup.clone());
        // Replaced by the real identity at join time.
        let placeholder = NodeId::new(format!("unjoined-{:016x}", shared.session_marker()))
            .expect("generated placeholder id is a valid segment");
        let local = Member::new(placeholder, shared.session_marker());

        Ok(Driver {
            config,
            coord,
            shared,
            wakeup_rx,
            queue,
            members: MemberSet::default(),
            blocking: BlockingController::default(),
            local,
            delegate,
            events_delivered: 0,
            leaves_delivered: 0,
        })
    }

    /// Start the join handshake: refuse if a previous session still owns our
    /// member znode, then append a JOIN_REQUEST for the master to answer.
    pub fn join(&mut self, node: NodeId, opaque: &[u8]) -> ClusterResult<()> {
        check_payload(opaque)?;
        let path = self.config.member_path(&node);
        if self.coord.exists(&path)? {
            error!(node = %node, "member znode already present; previous session still alive");
            return Err(ClusterError::StaleSession { node });
        }
        self.local = Member::new(node, self.shared.session_marker());
        info!(node = %self.local.node, session = self.local.session, "joining cluster");
        let event = Event::new(EventKind::JoinRequest, self.local.clone(), opaque);
        self.queue.push(&event)
    }

    /// Leave the cluster by deleting the own ephemeral member znode; peers
    /// observe the deletion watch.
    pub fn leave(&self) -> ClusterResult<()> {
        let path = self.config.member_path(&self.local.node);
        info!(path = %path, "leaving cluster");
        self.coord.delete(&path)
    }

    /// Broadcast a totally-ordered notification.
    pub fn notify(&mut self, msg: &[u8]) -> ClusterResult<()> {
        check_payload(msg)?;
        let event = Event::new(EventKind::Notify, self.local.clone(), msg);
        self.queue.push(&event)
    }

    /// Append a blocking event. Every node stalls on its slot until this
    /// node publishes the result with [`Driver::unblock`].
    pub fn block(&mut self) -> ClusterResult<()> {
        let event = Event::new(EventKind::Block, self.local.clone(), Vec::new());
        self.queue.push(&event)
    }

    /// Publish the result of the critical section: rewrite the own BLOCK at
    /// the head as a NOTIFY carrying `msg`, then lift the block.
    pub fn unblock(&mut self, msg: &[u8]) -> ClusterResult<()> {
        check_payload(msg)?;
        let mut event = self
            .next_event(PopMode::Unblock)?
            .unwrap_or_else(|| panic!("unblock with no event at the queue head"));
        assert!(
            event.kind == EventKind::Block && event.sender.node == self.local.node,
            "unblock popped {:?} from {} instead of the own block",
            event.kind,
            event.sender.node
        );
        event.kind = EventKind::Notify;
        event.payload = msg.to_vec();
        self.queue.rewrite_head(&event)?;
        self.blocking.release();
        self.shared.wakeup.post();
        Ok(())
    }

    /// Drive the dispatcher until shutdown or a fatal error. Returns
    /// `Ok(())` only after a deliberate shutdown (master transfer), in which
    /// case the daemon is expected to exit and be restarted.
    pub fn run(&mut self) -> ClusterResult<()> {
        loop {
            self.wakeup_rx
                .recv()
                .map_err(|_| ClusterError::SessionLost)?;
            match self.process_one()? {
                Flow::Continue => {}
                Flow::Shutdown => {
                    info!("dispatcher shut down");
                    return Ok(());
                }
            }
        }
    }

    /// Wait up to `timeout` for a wakeup and handle at most one event. For
    /// daemons that embed the driver in their own loop.
    pub fn poll(&mut self, timeout: Duration) -> ClusterResult<Flow> {
        match self.wakeup_rx.recv_timeout(timeout) {
            Ok(()) => self.process_one(),
            Err(RecvTimeoutError::Timeout) => Ok(Flow::Continue),
            Err(RecvTimeoutError::Disconnected) => Err(ClusterError::SessionLost),
        }
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            cursor: self.queue.pos(),
            members: self.members.len(),
            blocked: self.blocking.is_blocked(),
            pending_leaves: self.shared.leaves.len(),
            events_delivered: self.events_delivered,
            leaves_delivered: self.leaves_delivered,
        }
    }
}

fn check_payload(payload: &[u8]) -> ClusterResult<()> {
    if payload.len() > MAX_EVENT_BUF_SIZE {
        return Err(ClusterError::EventTooLarge {
            len: payload.len(),
            max: MAX_EVENT_BUF_SIZE,
        });
    }
    Ok(())
}

fn install_state_listener(zk: &Arc<ZooKeeper>, shared: &Arc<Shared>) {
    let shared = Arc::clone(shared);
    // Session-marker refreshes are driven by the watcher's session events;
    // this listener only watches for the terminal state.
    zk.add_listener(move |state| match state {
        ZkState::Connected => info!("coordination session established"),
        ZkState::Closed => {
            error!("coordination session closed");
            shared.session_lost.store(true, Ordering::Release);
            shared.wakeup.post();
        }
        other => debug!(state = ?other, "coordination state change"),
    });
}
