use std::fmt;

use thiserror::Error;

/// Maximum length of a node id in bytes.
///
/// Node ids are embedded verbatim in coordination-service paths, so they must
/// fit a single path segment.
pub const MAX_NODE_ID_LEN: usize = 255;

/// Error returned when an id cannot serve as a znode path segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid node id {0:?}: must be nonempty, at most {MAX_NODE_ID_LEN} bytes and contain no '/'")]
pub struct InvalidNodeId(pub String);

/// Opaque node identity.
///
/// Two nodes are the same node iff their ids are byte-equal, and the total
/// order on ids (plain byte order) is the order master election runs on. The
/// id doubles as the trailing segment of the node's member znode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidNodeId> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_NODE_ID_LEN || id.contains('/') {
            return Err(InvalidNodeId(id));
        }
        Ok(NodeId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A member record: the node, the session marker of the connection that
/// announced it, and whether its join handshake has completed.
///
/// `joined` is false between a node's join request and its join response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub node: NodeId,
    pub session: u64,
    pub joined: bool,
}

impl Member {
    /// A record for a node that has not completed the join handshake yet.
    pub fn new(node: NodeId, session: u64) -> Self {
        Member {
            node,
            session,
            joined: false,
        }
    }
}
