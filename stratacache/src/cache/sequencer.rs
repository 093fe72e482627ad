//! Per-key write and read sequencing.
//!
//! A store with an encode step reaches the disk queue only after encoding
//! finishes, so a removal submitted later can be queued first. Without
//! sequencing, the write would then recreate the entry the caller just
//! removed.
//!
//! Each write takes a [`WriteTicket`] when it is submitted. Removals record
//! the sequence number at which they happened, and `remove_all` advances a
//! global epoch. When the write finally runs on the queue it checks its
//! ticket and skips itself if a removal happened after it was submitted.
//!
//! Reads are the mirror image. A `get` that misses memory takes a
//! [`ReadTicket`] before its disk read; any store or removal of the key
//! while the read and decode are in flight bumps the key's generation, and
//! the decoded value is then returned without being put into memory.
//!
//! Tickets retire themselves when dropped, including when the job holding
//! them is discarded by a closed queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

#[derive(Debug, Default)]
struct KeyState {
    /// Writes submitted but not yet run.
    pending: usize,
    /// Sequence number of the latest removal while writes were pending.
    removed_at: Option<u64>,
}

#[derive(Debug, Default)]
struct ReadState {
    /// Reads in flight.
    readers: usize,
    /// Bumped by every store or removal while reads are in flight.
    generation: u64,
}

/// Proof of submission order for one write.
#[derive(Debug)]
pub struct WriteTicket {
    sequencer: Arc<WriteSequencer>,
    key: String,
    seq: u64,
    epoch: u64,
}

impl WriteTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the write may still go ahead.
    pub fn is_current(&self) -> bool {
        let sequencer = &self.sequencer;
        if self.epoch != sequencer.epoch.load(Ordering::SeqCst) {
            return false;
        }
        match sequencer.writes.get(&self.key) {
            Some(state) => state.removed_at.map_or(true, |removed| removed < self.seq),
            None => true,
        }
    }
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        self.sequencer.writes.remove_if_mut(&self.key, |_, state| {
            state.pending = state.pending.saturating_sub(1);
            state.pending == 0
        });
    }
}

/// Snapshot of a key's generation taken before a disk read.
#[derive(Debug)]
pub struct ReadTicket {
    sequencer: Arc<WriteSequencer>,
    key: String,
    generation: u64,
}

impl ReadTicket {
    /// Run `insert` if no store or removal of the key happened since the
    /// ticket was taken. Returns whether it ran.
    ///
    /// The check and `insert` happen under the key's lock, so a store or
    /// removal racing with this call is ordered entirely before or after it.
    pub fn commit<F: FnOnce()>(self, insert: F) -> bool {
        // Bound first so the key's lock is released before the ticket retires
        let current = match self.sequencer.reads.get_mut(&self.key) {
            Some(state) if state.generation == self.generation => {
                insert();
                true
            }
            _ => false,
        };
        current
    }
}

impl Drop for ReadTicket {
    fn drop(&mut self) {
        self.sequencer.reads.remove_if_mut(&self.key, |_, state| {
            state.readers = state.readers.saturating_sub(1);
            state.readers == 0
        });
    }
}

/// Tracks writes and reads in flight and the stores and removals that
/// supersede them.
#[derive(Debug, Default)]
pub struct WriteSequencer {
    writes: DashMap<String, KeyState>,
    reads: DashMap<String, ReadState>,
    next_seq: AtomicU64,
    epoch: AtomicU64,
}

impl WriteSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a write for `key` at the moment it is submitted.
    pub fn begin_write(self: &Arc<Self>, key: &str) -> WriteTicket {
        let mut state = self.writes.entry(key.to_string()).or_default();
        state.pending += 1;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let epoch = self.epoch.load(Ordering::SeqCst);
        drop(state);

        WriteTicket {
            sequencer: Arc::clone(self),
            key: key.to_string(),
            seq,
            epoch,
        }
    }

    /// Register a disk read for `key` before it is submitted.
    pub fn begin_read(self: &Arc<Self>, key: &str) -> ReadTicket {
        let mut state = self.reads.entry(key.to_string()).or_default();
        state.readers += 1;
        let generation = state.generation;
        drop(state);

        ReadTicket {
            sequencer: Arc::clone(self),
            key: key.to_string(),
            generation,
        }
    }

    /// Record a new value for `key` in memory. Must be called before the
    /// value is inserted.
    pub fn note_store(&self, key: &str) {
        self.bump_reads(key);
    }

    /// Record a removal of `key`, superseding every write and read
    /// submitted so far. Must be called before the memory entry is removed.
    pub fn note_removal(&self, key: &str) {
        if let Some(mut state) = self.writes.get_mut(key) {
            state.removed_at = Some(self.next_seq.fetch_add(1, Ordering::SeqCst));
        }
        self.bump_reads(key);
    }

    /// Record a removal of every key. Must be called before memory is
    /// cleared.
    pub fn note_remove_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for mut state in self.reads.iter_mut() {
            state.generation += 1;
        }
    }

    /// Number of keys with writes in flight.
    pub fn pending_keys(&self) -> usize {
        self.writes.len()
    }

    /// Number of keys with reads in flight.
    pub fn pending_reads(&self) -> usize {
        self.reads.len()
    }

    fn bump_reads(&self, key: &str) {
        if let Some(mut state) = self.reads.get_mut(key) {
            state.generation += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer() -> Arc<WriteSequencer> {
        Arc::new(WriteSequencer::new())
    }

    #[test]
    fn test_write_without_removal_is_current() {
        let seq = sequencer();
        let ticket = seq.begin_write("a");
        assert!(ticket.is_current());
        drop(ticket);
        assert_eq!(seq.pending_keys(), 0);
    }

    #[test]
    fn test_removal_supersedes_earlier_write() {
        let seq = sequencer();
        let ticket = seq.begin_write("a");
        seq.note_removal("a");
        assert!(!ticket.is_current());
    }

    #[test]
    fn test_write_after_removal_is_current() {
        let seq = sequencer();
        let early = seq.begin_write("a");
        seq.note_removal("a");
        let late = seq.begin_write("a");

        assert!(!early.is_current());
        assert!(late.is_current());

        drop(early);
        drop(late);
        assert_eq!(seq.pending_keys(), 0);
    }

    #[test]
    fn test_removal_of_other_key_has_no_effect() {
        let seq = sequencer();
        let ticket = seq.begin_write("a");
        let _other = seq.begin_write("b");
        seq.note_removal("b");
        assert!(ticket.is_current());
    }

    #[test]
    fn test_remove_all_supersedes_every_pending_write() {
        let seq = sequencer();
        let a = seq.begin_write("a");
        let b = seq.begin_write("b");
        seq.note_remove_all();
        let c = seq.begin_write("c");

        assert!(!a.is_current());
        assert!(!b.is_current());
        assert!(c.is_current());
    }

    #[test]
    fn test_state_dropped_when_last_write_finishes() {
        let seq = sequencer();
        let first = seq.begin_write("a");
        let second = seq.begin_write("a");
        seq.note_removal("a");

        drop(first);
        assert_eq!(seq.pending_keys(), 1);
        drop(second);
        assert_eq!(seq.pending_keys(), 0);

        // Removal with nothing pending leaves no state behind
        seq.note_removal("a");
        assert_eq!(seq.pending_keys(), 0);
    }

    #[test]
    fn test_ticket_dropped_inside_discarded_job_is_retired() {
        let seq = sequencer();
        let ticket = seq.begin_write("a");
        let job: Box<dyn FnOnce() + Send> = Box::new(move || {
            let _ = ticket.is_current();
        });
        assert_eq!(seq.pending_keys(), 1);

        // A closed queue drops jobs without running them
        drop(job);
        assert_eq!(seq.pending_keys(), 0);
    }

    #[test]
    fn test_read_commits_without_interference() {
        let seq = sequencer();
        let ticket = seq.begin_read("a");
        let mut inserted = false;
        assert!(ticket.commit(|| inserted = true));
        assert!(inserted);
        assert_eq!(seq.pending_reads(), 0);
    }

    #[test]
    fn test_store_during_read_blocks_commit() {
        let seq = sequencer();
        let ticket = seq.begin_read("a");
        seq.note_store("a");

        let mut inserted = false;
        assert!(!ticket.commit(|| inserted = true));
        assert!(!inserted);
        assert_eq!(seq.pending_reads(), 0);
    }

    #[test]
    fn test_removal_during_read_blocks_commit() {
        let seq = sequencer();
        let ticket = seq.begin_read("a");
        let other = seq.begin_read("b");
        seq.note_removal("a");

        assert!(!ticket.commit(|| {}));
        assert!(other.commit(|| {}));
    }

    #[test]
    fn test_remove_all_during_read_blocks_commit() {
        let seq = sequencer();
        let a = seq.begin_read("a");
        let b = seq.begin_read("b");
        seq.note_remove_all();
        let c = seq.begin_read("c");

        assert!(!a.commit(|| {}));
        assert!(!b.commit(|| {}));
        assert!(c.commit(|| {}));
        assert_eq!(seq.pending_reads(), 0);
    }

    #[test]
    fn test_read_started_after_store_commits() {
        let seq = sequencer();
        let early = seq.begin_read("a");
        seq.note_store("a");
        let late = seq.begin_read("a");

        assert!(!early.commit(|| {}));
        assert!(late.commit(|| {}));
    }
}
