//! Totally-ordered event queue over sequentially-named znodes.
//!
//! The queue is append-only: every event is one sequential child under the
//! queue directory, and each node walks the children with a private cursor.
//! Stalling the whole cluster on an event is done by *not* advancing the
//! cursor; publishing a derived event without perturbing the order is done
//! by rewriting the slot in place, so every node sees the transformation at
//! the same sequence position.

use shoal_types::Event;
use tracing::{debug, trace};

use crate::coord::CoordClient;
use crate::error::ClusterResult;
use crate::wakeup::Wakeup;

pub(crate) struct EventQueue {
    coord: CoordClient,
    dir: String,
    wakeup: Wakeup,
    pos: i64,
    first_push: bool,
}

impl EventQueue {
    pub fn new(coord: CoordClient, dir: String, wakeup: Wakeup) -> Self {
        Self {
            coord,
            dir,
            wakeup,
            pos: 0,
            first_push: true,
        }
    }

    pub fn pos(&self) -> i64 {
        self.pos
    }

    fn slot(&self, pos: i64) -> String {
        slot_path(&self.dir, pos)
    }

    /// Append an event. The first push by this process seeds the cursor with
    /// the sequence number the service assigned, so a fresh node starts
    /// reading at its own join request.
    pub fn push(&mut self, event: &Event) -> ClusterResult<()> {
        let data = event.encode_vec()?;
        let created = self
            .coord
            .create_sequential(&format!("{}/", self.dir), &data)?;
        debug!(path = %created, pos = self.pos, len = data.len(), "pushed event");
        if self.first_push {
            self.pos = parse_seq(&created);
            self.first_push = false;
            self.wakeup.post();
        }
        Ok(())
    }

    /// Pop the event at the cursor, if any.
    ///
    /// The exists probe on an empty slot arms the watch that will announce
    /// the successor. For a blocking event the data watch armed by the read
    /// is deliberately the only one left standing: the slot itself will be
    /// rewritten, and that rewrite is the next thing worth waking for.
    pub fn pop(&mut self) -> ClusterResult<Option<Event>> {
        let path = self.slot(self.pos);
        if !self.coord.exists(&path)? {
            return Ok(None);
        }
        let data = match self.coord.get_data(&path)? {
            Some(data) => data,
            None => panic!("queue znode {path} vanished between exists and read"),
        };
        let event = Event::decode_vec(&data)?;
        trace!(path = %path, kind = ?event.kind, len = data.len(), "popped event");
        self.pos += 1;
        if event.is_blocking() {
            return Ok(Some(event));
        }
        self.peek_next_notify()?;
        Ok(Some(event))
    }

    /// Arm a watch on the slot after the cursor and self-notify if it is
    /// already populated, so an existing successor is not lost.
    fn peek_next_notify(&self) -> ClusterResult<()> {
        if self.coord.exists(&self.slot(self.pos))? {
            self.wakeup.post();
        }
        Ok(())
    }

    /// Replace the event the cursor just moved past, in place. The slot's
    /// sequence number never changes; only its payload does.
    pub fn rewrite_head(&mut self, event: &Event) -> ClusterResult<()> {
        self.pos -= 1;
        let path = self.slot(self.pos);
        let data = event.encode_vec()?;
        self.coord.set_data(&path, &data)?;
        debug!(path = %path, kind = ?event.kind, len = data.len(), "rewrote queue head");
        Ok(())
    }

    /// Step the cursor back so the same slot is reread on the next wakeup.
    pub fn step_back(&mut self) {
        self.pos -= 1;
    }

    /// Read the event at the cursor without consuming it.
    pub fn read_head(&self) -> ClusterResult<Option<Event>> {
        match self.coord.get_data(&self.slot(self.pos))? {
            Some(data) => Ok(Some(Event::decode_vec(&data)?)),
            None => Ok(None),
        }
    }

    /// Move past the head without delivering it (dead-blocker skip).
    pub fn skip_head(&mut self) -> ClusterResult<()> {
        self.pos += 1;
        self.peek_next_notify()
    }
}

fn slot_path(dir: &str, pos: i64) -> String {
    format!("{dir}/{pos:010}")
}

fn parse_seq(created: &str) -> i64 {
    created
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
        .unwrap_or_else(|| panic!("sequential create returned unparseable path {created:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_ten_digit_zero_padded() {
        assert_eq!(slot_path("/shoal/queue", 0), "/shoal/queue/0000000000");
        assert_eq!(slot_path("/shoal/queue", 42), "/shoal/queue/0000000042");
        assert_eq!(
            slot_path("/shoal/queue", 1_234_567_890),
            "/shoal/queue/1234567890"
        );
    }

    #[test]
    fn sequence_parses_from_created_path() {
        assert_eq!(parse_seq("/shoal/queue/0000000000"), 0);
        assert_eq!(parse_seq("/shoal/queue/0000000317"), 317);
    }

    #[test]
    #[should_panic(expected = "unparseable")]
    fn garbage_sequence_panics() {
        parse_seq("/shoal/queue/not-a-number");
    }
}
