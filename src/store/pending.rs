//! Bookkeeping for optimistic writes in flight.

use std::collections::HashMap;
use std::sync::Arc;

/// One optimistic mutation awaiting the gateway.
#[derive(Debug, Clone)]
pub struct PendingWrite<E> {
    pub entity_id: String,
    /// Value applied to the cache before the gateway answered.
    pub optimistic: Arc<E>,
    /// Confirmed value at the time the write was issued.
    pub prior_confirmed: Option<Arc<E>>,
}

/// In-flight writes keyed by a per-store sequence number.
#[derive(Debug)]
pub(crate) struct PendingWrites<E> {
    next_seq: u64,
    writes: HashMap<u64, PendingWrite<E>>,
}

impl<E> Default for PendingWrites<E> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            writes: HashMap::new(),
        }
    }
}

impl<E> PendingWrites<E> {
    /// Record a write and return its sequence number.
    pub(crate) fn begin(&mut self, write: PendingWrite<E>) -> u64 {
        self.next_seq += 1;
        self.writes.insert(self.next_seq, write);
        self.next_seq
    }

    /// Remove and return the write with sequence `seq`.
    pub(crate) fn finish(&mut self, seq: u64) -> Option<PendingWrite<E>> {
        self.writes.remove(&seq)
    }

    /// Number of writes in flight for `id`.
    pub(crate) fn count_for(&self, id: &str) -> usize {
        self.writes
            .values()
            .filter(|write| write.entity_id == id)
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn clear(&mut self) {
        self.writes.clear();
    }
}
