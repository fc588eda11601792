//! In-memory ordered view of the cluster membership.

use std::collections::BTreeMap;

use shoal_types::{Member, NodeId};

/// Ordered map of known members keyed by node id.
///
/// Mutated only from the dispatcher. Ascending id order is the master
/// election order: the minimum element is the master.
#[derive(Debug, Default)]
pub(crate) struct MemberSet {
    members: BTreeMap<NodeId, Member>,
}

impl MemberSet {
    /// Insert a record; a node that is already known keeps its record.
    pub fn insert(&mut self, member: Member) {
        self.members.entry(member.node.clone()).or_insert(member);
    }

    pub fn remove(&mut self, node: &NodeId) -> Option<Member> {
        self.members.remove(node)
    }

    /// The member with the smallest node id.
    pub fn first(&self) -> Option<&Member> {
        self.members.values().next()
    }

    /// Members in ascending node id order, for handler callbacks.
    pub fn snapshot(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
