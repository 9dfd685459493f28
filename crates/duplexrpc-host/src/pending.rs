//! Bookkeeping for outgoing calls that are waiting on replies.

use std::collections::{HashMap, HashSet, VecDeque};

use duplexrpc_registry::Payload;
use tokio::sync::mpsc;

use crate::error::{CallError, HostError};

/// One routed response: a decoded payload, or why it could not be decoded.
pub(crate) type Delivery = std::result::Result<Payload, CallError>;

/// How the caller consumes a pending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// Sent, but neither `expect_one` nor `expect_many` claimed it yet.
    Reserved,
    /// Completes on the first response.
    Unary,
    /// Completes on `Close`, `Error` or `Undefined`.
    Streaming,
}

/// What the read loop did with a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Delivered,
    /// The entry exists but the frame was dropped (undecodable stream item).
    Dropped,
    /// The call was abandoned; the reply arrived after the caller gave up.
    Late,
    /// No call with this id was ever outstanding.
    Orphaned,
}

/// Snapshot of host counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    /// Outgoing calls still waiting on a reply.
    pub pending_calls: usize,
    /// Replies naming an id this host never had outstanding.
    pub orphaned_callbacks: u64,
    /// Replies to calls that timed out or were abandoned.
    pub late_callbacks: u64,
    /// Stream items whose type could not be decoded.
    pub undecodable_frames: u64,
    /// Frames that did not parse as an envelope.
    pub malformed_envelopes: u64,
}

struct Entry {
    kind: CallKind,
    tx: mpsc::UnboundedSender<Delivery>,
}

pub(crate) struct PendingTable {
    entries: HashMap<u32, Entry>,
    tombstones: VecDeque<u32>,
    tombstone_set: HashSet<u32>,
    max_tombstones: usize,
    last_id: u32,
    closed: bool,
    stats: HostStats,
}

impl PendingTable {
    pub(crate) fn new(max_tombstones: usize) -> Self {
        Self {
            entries: HashMap::new(),
            tombstones: VecDeque::new(),
            tombstone_set: HashSet::new(),
            max_tombstones,
            last_id: 0,
            closed: false,
            stats: HostStats::default(),
        }
    }

    /// Next envelope id. Never 0, never an id that is outstanding or
    /// tombstoned, so a late reply cannot be mistaken for a fresh call's.
    pub(crate) fn allocate_id(&mut self) -> u32 {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            let id = self.last_id;
            if id != 0 && !self.entries.contains_key(&id) && !self.tombstone_set.contains(&id) {
                return id;
            }
        }
    }

    /// Register an outgoing call before its frame is written.
    pub(crate) fn insert(
        &mut self,
        id: u32,
        tx: mpsc::UnboundedSender<Delivery>,
    ) -> Result<(), HostError> {
        if self.closed {
            return Err(HostError::Closed);
        }
        self.entries.insert(
            id,
            Entry {
                kind: CallKind::Reserved,
                tx,
            },
        );
        Ok(())
    }

    pub(crate) fn set_kind(&mut self, id: u32, kind: CallKind) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.kind = kind;
        }
    }

    /// Hand a response to the waiting caller and retire the entry when the
    /// response completes the call.
    pub(crate) fn route(&mut self, parent_id: u32, delivery: Delivery) -> Route {
        let Some(entry) = self.entries.get(&parent_id) else {
            if self.tombstone_set.contains(&parent_id) {
                self.stats.late_callbacks += 1;
                return Route::Late;
            }
            self.stats.orphaned_callbacks += 1;
            return Route::Orphaned;
        };

        let terminal = match (&delivery, entry.kind) {
            (_, CallKind::Unary) => true,
            // Unclaimed: a unary claim reports it, a stream claim skips it.
            (Err(CallError::Decode(_)), CallKind::Reserved) => false,
            (Err(CallError::Decode(_)), CallKind::Streaming) => {
                self.stats.undecodable_frames += 1;
                return Route::Dropped;
            }
            (Ok(Payload::Message(_)), _) => false,
            _ => true,
        };

        // A closed receiver means the consumer is finishing up; it clears the
        // entry itself.
        let _ = entry.tx.send(delivery);
        if terminal {
            self.entries.remove(&parent_id);
        }
        Route::Delivered
    }

    /// Drop an entry whose caller finished normally.
    pub(crate) fn complete(&mut self, id: u32) {
        self.entries.remove(&id);
    }

    /// Drop an entry whose caller gave up. Later replies count as late.
    pub(crate) fn abandon(&mut self, id: u32) {
        if self.entries.remove(&id).is_none() {
            return;
        }
        if self.max_tombstones == 0 {
            return;
        }
        while self.tombstones.len() >= self.max_tombstones {
            if let Some(oldest) = self.tombstones.pop_front() {
                self.tombstone_set.remove(&oldest);
            }
        }
        self.tombstones.push_back(id);
        self.tombstone_set.insert(id);
    }

    /// Fail every outstanding call and refuse new ones.
    pub(crate) fn close(&mut self) -> usize {
        self.closed = true;
        let failed = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.tx.send(Err(CallError::Disconnected));
        }
        failed
    }

    pub(crate) fn note_malformed(&mut self) {
        self.stats.malformed_envelopes += 1;
    }

    pub(crate) fn note_undecodable(&mut self) {
        self.stats.undecodable_frames += 1;
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn stats(&self) -> HostStats {
        HostStats {
            pending_calls: self.entries.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use duplexrpc_registry::RegistryError;

    use super::*;

    fn entry(table: &mut PendingTable) -> (u32, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = table.allocate_id();
        table.insert(id, tx).unwrap();
        (id, rx)
    }

    #[test]
    fn ids_start_at_one_and_skip_zero_on_wrap() {
        let mut table = PendingTable::new(8);
        assert_eq!(table.allocate_id(), 1);
        table.last_id = u32::MAX - 1;
        assert_eq!(table.allocate_id(), u32::MAX);
        assert_eq!(table.allocate_id(), 1);
    }

    #[test]
    fn ids_skip_outstanding_and_tombstoned() {
        let mut table = PendingTable::new(8);
        let (first, _rx1) = entry(&mut table);
        let (second, _rx2) = entry(&mut table);
        table.abandon(second);

        table.last_id = 0;
        let next = table.allocate_id();
        assert_ne!(next, first);
        assert_ne!(next, second);
        assert_eq!(next, 3);
    }

    #[test]
    fn unary_entry_retires_on_first_reply() {
        let mut table = PendingTable::new(8);
        let (id, mut rx) = entry(&mut table);
        table.set_kind(id, CallKind::Unary);

        assert_eq!(table.route(id, Ok(Payload::message(1u8))), Route::Delivered);
        assert!(matches!(rx.try_recv(), Ok(Ok(Payload::Message(_)))));
        assert_eq!(table.stats().pending_calls, 0);

        assert_eq!(table.route(id, Ok(Payload::message(2u8))), Route::Orphaned);
        assert_eq!(table.stats().orphaned_callbacks, 1);
    }

    #[test]
    fn streaming_entry_stays_until_close() {
        let mut table = PendingTable::new(8);
        let (id, mut rx) = entry(&mut table);
        table.set_kind(id, CallKind::Streaming);

        for value in 0..3u8 {
            assert_eq!(table.route(id, Ok(Payload::message(value))), Route::Delivered);
        }
        assert_eq!(table.stats().pending_calls, 1);
        assert_eq!(table.route(id, Ok(Payload::Close)), Route::Delivered);
        assert_eq!(table.stats().pending_calls, 0);

        let mut kinds = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            kinds.push(delivery.unwrap().kind());
        }
        assert_eq!(kinds, ["message", "message", "message", "close"]);
    }

    #[test]
    fn undecodable_stream_item_is_dropped_and_counted() {
        let mut table = PendingTable::new(8);
        let (id, mut rx) = entry(&mut table);
        table.set_kind(id, CallKind::Streaming);

        let err = CallError::Decode(RegistryError::UnknownType("x.Unknown".into()));
        assert_eq!(table.route(id, Err(err)), Route::Dropped);
        assert!(rx.try_recv().is_err());
        assert_eq!(table.stats().undecodable_frames, 1);
        assert_eq!(table.stats().pending_calls, 1);
    }

    #[test]
    fn undecodable_reply_before_claim_is_held_for_the_caller() {
        let mut table = PendingTable::new(8);
        let (id, mut rx) = entry(&mut table);

        let err = CallError::Decode(RegistryError::UnknownType("x.Unknown".into()));
        assert_eq!(table.route(id, Err(err)), Route::Delivered);
        assert!(matches!(rx.try_recv(), Ok(Err(CallError::Decode(_)))));
        assert_eq!(table.stats().pending_calls, 1);
        assert_eq!(table.stats().undecodable_frames, 0);
    }

    #[test]
    fn abandoned_ids_are_late_not_orphaned() {
        let mut table = PendingTable::new(8);
        let (id, _rx) = entry(&mut table);
        table.abandon(id);

        assert_eq!(table.route(id, Ok(Payload::Undefined)), Route::Late);
        assert_eq!(table.route(999, Ok(Payload::Undefined)), Route::Orphaned);
        let stats = table.stats();
        assert_eq!(stats.late_callbacks, 1);
        assert_eq!(stats.orphaned_callbacks, 1);
    }

    #[test]
    fn tombstones_are_bounded() {
        let mut table = PendingTable::new(2);
        let ids: Vec<u32> = (0..3)
            .map(|_| {
                let (id, _rx) = entry(&mut table);
                table.abandon(id);
                id
            })
            .collect();

        assert_eq!(table.route(ids[0], Ok(Payload::Close)), Route::Orphaned);
        assert_eq!(table.route(ids[1], Ok(Payload::Close)), Route::Late);
        assert_eq!(table.route(ids[2], Ok(Payload::Close)), Route::Late);
    }

    #[test]
    fn close_fails_pending_and_rejects_new_calls() {
        let mut table = PendingTable::new(8);
        let (_, mut rx) = entry(&mut table);

        assert_eq!(table.close(), 1);
        assert!(table.is_closed());
        assert!(matches!(rx.try_recv(), Ok(Err(CallError::Disconnected))));

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(table.insert(5, tx), Err(HostError::Closed)));
    }
}
