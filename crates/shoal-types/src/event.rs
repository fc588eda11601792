use crate::node::Member;

/// Cluster event discriminants as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventKind {
    JoinRequest = 1,
    JoinResponse = 2,
    Leave = 3,
    Block = 4,
    Notify = 5,
}

impl EventKind {
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(raw: u32) -> Option<EventKind> {
        match raw {
            1 => Some(EventKind::JoinRequest),
            2 => Some(EventKind::JoinResponse),
            3 => Some(EventKind::Leave),
            4 => Some(EventKind::Block),
            5 => Some(EventKind::Notify),
            _ => None,
        }
    }
}

/// Outcome of the master's admission check for a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum JoinResult {
    Success = 0,
    JoinLater = 1,
    /// The joiner must take over as master; the current master leaves.
    MasterTransfer = 2,
    Fail = 3,
}

impl JoinResult {
    pub fn to_wire(self) -> u32 {
        self as u32
    }

    pub fn from_wire(raw: u32) -> Option<JoinResult> {
        match raw {
            0 => Some(JoinResult::Success),
            1 => Some(JoinResult::JoinLater),
            2 => Some(JoinResult::MasterTransfer),
            3 => Some(JoinResult::Fail),
            _ => None,
        }
    }
}

/// A totally-ordered cluster event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Snapshot of the sender's member record at publish time.
    pub sender: Member,
    /// Meaningful for `JoinResponse`; carried on the wire for every event.
    pub join_result: JoinResult,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(kind: EventKind, sender: Member, payload: impl Into<Vec<u8>>) -> Event {
        Event {
            kind,
            sender,
            join_result: JoinResult::Success,
            payload: payload.into(),
        }
    }

    pub fn leave(sender: Member) -> Event {
        Event::new(EventKind::Leave, sender, Vec::new())
    }

    /// Blocking events stall delivery at every node until their originator
    /// rewrites them in place.
    pub fn is_blocking(&self) -> bool {
        matches!(self.kind, EventKind::Block | EventKind::JoinRequest)
    }
}
