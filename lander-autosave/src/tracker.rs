//! Change tracker: the single record of what changed since the last save.
//!
//! Every accepted edit gets a monotonically increasing edit sequence
//! number. A save remembers the sequence it started at; when it completes,
//! [`ChangeTracker::acknowledge`] drains exactly the changes that save
//! covered and clears the dirty flag only if nothing newer arrived.

use std::collections::VecDeque;

use lander_core::ChangeEvent;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedChange {
    pub seq: u64,
    pub change: ChangeEvent,
}

#[derive(Debug)]
pub struct ChangeTracker {
    queue: VecDeque<QueuedChange>,
    max_queue_size: usize,
    /// Last edit sequence handed out. Also bumped by wholesale replacements.
    edit_seq: u64,
    /// Changes recorded since the last snapshot (auto-snapshot trigger).
    since_snapshot: Vec<ChangeEvent>,
    dirty: bool,
    dropped: u64,
}

impl ChangeTracker {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_queue_size.min(1024)),
            max_queue_size: max_queue_size.max(1),
            edit_seq: 0,
            since_snapshot: Vec::new(),
            dirty: false,
            dropped: 0,
        }
    }

    /// Record an edit. Never fails loudly: malformed changes are rejected
    /// with `false`, insignificant ones are accepted without queueing.
    pub fn record(&mut self, change: ChangeEvent) -> bool {
        if let Err(e) = change.validate() {
            log::warn!("Rejected change event: {e}");
            return false;
        }
        if !change.is_significant() {
            log::trace!("Ignoring insignificant change {}", change.field_path());
            return true;
        }

        self.edit_seq += 1;
        self.since_snapshot.push(change.clone());
        self.queue.push_back(QueuedChange {
            seq: self.edit_seq,
            change,
        });
        if self.queue.len() > self.max_queue_size {
            self.queue.pop_front();
            self.dropped += 1;
            log::warn!(
                "Change queue over {} entries, dropped oldest ({} dropped so far)",
                self.max_queue_size,
                self.dropped
            );
        }
        self.dirty = true;
        true
    }

    /// Mark the document dirty without a change event (undo, redo, merge).
    pub fn mark_dirty(&mut self) -> u64 {
        self.edit_seq += 1;
        self.dirty = true;
        self.edit_seq
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn edit_seq(&self) -> u64 {
        self.edit_seq
    }

    pub fn queued_changes(&self) -> Vec<ChangeEvent> {
        self.queue.iter().map(|q| q.change.clone()).collect()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn changes_since_snapshot(&self) -> usize {
        self.since_snapshot.len()
    }

    /// Hand over the changes accumulated since the last snapshot and
    /// restart the auto-snapshot count.
    pub fn take_since_snapshot(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.since_snapshot)
    }

    /// A save that started at `seq_at_start` succeeded. Returns whether the
    /// document is now clean.
    pub fn acknowledge(&mut self, seq_at_start: u64) -> bool {
        while self
            .queue
            .front()
            .is_some_and(|q| q.seq <= seq_at_start)
        {
            self.queue.pop_front();
        }
        if self.edit_seq == seq_at_start {
            self.dirty = false;
        }
        !self.dirty
    }

    /// Drop everything queued and consider the document clean (the remote
    /// copy was adopted wholesale).
    pub fn clear(&mut self) {
        self.queue.clear();
        self.since_snapshot.clear();
        self.dirty = false;
    }
}
