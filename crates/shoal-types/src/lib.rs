//! # Shoal Types
//!
//! Shared data model for the shoal cluster driver: node identities, member
//! records, the cluster event union and its packed wire format.
//!
//! The member-record and event layouts are fixed and shared with the
//! embedding storage daemon, which links this crate to exchange records with
//! the driver.
//!
//! ## Organization
//!
//! - `node`: node identity and member records
//! - `event`: the totally-ordered cluster event union
//! - `wire`: packed binary encoding with payload cap enforcement

mod event;
mod node;
mod wire;

pub use event::{Event, EventKind, JoinResult};
pub use node::{InvalidNodeId, Member, NodeId, MAX_NODE_ID_LEN};
pub use wire::{WireError, MAX_EVENT_BUF_SIZE};
