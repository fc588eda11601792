use shoal_types::{InvalidNodeId, NodeId, WireError};
use thiserror::Error;
use zookeeper::ZkError;

/// Result type for driver operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Error surface of the cluster driver.
///
/// Transient coordination failures (`ConnectionLoss`, `OperationTimeout`)
/// never appear here; they are retried inside the facade until they land.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Non-transient coordination-service failure.
    #[error("coordination service error: {0:?}")]
    Coordination(ZkError),

    /// Malformed record read from the coordination service.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Our member znode already exists at join time: a previous session for
    /// this node id is still live. The caller is expected to exit and retry
    /// after the old session expires.
    #[error("member znode for {node} already exists; previous session still alive")]
    StaleSession { node: NodeId },

    /// The coordination session is gone; no delivery guarantees survive it.
    #[error("coordination session lost")]
    SessionLost,

    /// Payload handed to notify/join/unblock exceeds the event buffer cap.
    #[error("event payload of {len} bytes exceeds the {max}-byte cap")]
    EventTooLarge { len: usize, max: usize },

    #[error(transparent)]
    NodeId(#[from] InvalidNodeId),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<ZkError> for ClusterError {
    fn from(err: ZkError) -> Self {
        ClusterError::Coordination(err)
    }
}

impl ClusterError {
    /// Short label for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ClusterError::Coordination(_) => "coordination",
            ClusterError::Wire(_) => "wire",
            ClusterError::StaleSession { .. } => "stale_session",
            ClusterError::SessionLost => "session_lost",
            ClusterError::EventTooLarge { .. } => "event_too_large",
            ClusterError::NodeId(_) => "node_id",
            ClusterError::Configuration(_) => "configuration",
        }
    }

    /// Fatal errors end the driver; the embedding daemon should exit and let
    /// its supervisor restart it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClusterError::StaleSession { .. } | ClusterError::SessionLost
        )
    }
}
