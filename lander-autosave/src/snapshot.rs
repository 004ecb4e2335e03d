//! Snapshot records and the linear undo history over them.
//!
//! ```text
//!  snapshots: [ s0 | s1 | s2 | s3 ]
//!                         ▲
//!                       current        undo ◄──   ──► redo
//!
//!  push(s4) while current = 2  →  [ s0 | s1 | s2 | s4 ]   (s3 discarded)
//!  push beyond max_snapshots   →  oldest evicted, current shifts left
//! ```
//!
//! Every snapshot is a complete document, so moving the cursor is O(1)
//! and never replays change events.

use lander_core::{ChangeEvent, DocumentState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::CompressedSnapshot;

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotOrigin {
    User,
    AutoSave,
    System,
}

impl SnapshotOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotOrigin::User => "user",
            SnapshotOrigin::AutoSave => "auto-save",
            SnapshotOrigin::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum SnapshotPayload {
    Plain(DocumentState),
    Compressed(CompressedSnapshot),
}

/// A snapshot as held by the history. The payload may be compressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub id: Uuid,
    /// Monotonic per manager, never reused after eviction.
    pub version: u64,
    pub timestamp: u64,
    pub description: String,
    pub origin: SnapshotOrigin,
    pub source_changes: Vec<ChangeEvent>,
    pub tags: Vec<String>,
    /// Uncompressed JSON size in bytes.
    pub size: usize,
    pub payload: SnapshotPayload,
}

impl StoredSnapshot {
    pub fn is_compressed(&self) -> bool {
        matches!(self.payload, SnapshotPayload::Compressed(_))
    }

    pub(crate) fn into_view(self, data: DocumentState) -> Snapshot {
        let compressed = self.is_compressed();
        Snapshot {
            id: self.id,
            version: self.version,
            timestamp: self.timestamp,
            description: self.description,
            origin: self.origin,
            source_changes: self.source_changes,
            tags: self.tags,
            size: self.size,
            compressed,
            data,
        }
    }
}

/// A snapshot as seen by callers: always carries the decoded document.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: Uuid,
    pub version: u64,
    pub timestamp: u64,
    pub description: String,
    pub origin: SnapshotOrigin,
    pub source_changes: Vec<ChangeEvent>,
    pub tags: Vec<String>,
    pub size: usize,
    /// Whether the stored form is compressed.
    pub compressed: bool,
    pub data: DocumentState,
}

/// Outcome of appending to the history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOutcome {
    /// Redo-tail snapshots discarded because the cursor was not at the end.
    pub truncated: usize,
    pub evicted: Vec<Uuid>,
}

/// Ordered snapshots plus the undo cursor.
///
/// Invariant: `current` is `Some(i)` with `i < len` whenever the history is
/// non-empty, and `None` otherwise.
#[derive(Debug, Clone)]
pub struct VersionHistory {
    snapshots: Vec<StoredSnapshot>,
    current: Option<usize>,
    max_snapshots: usize,
}

impl VersionHistory {
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            current: None,
            max_snapshots: max_snapshots.max(1),
        }
    }

    /// Rebuild from exported parts, checking the cursor invariant.
    pub fn from_parts(
        snapshots: Vec<StoredSnapshot>,
        current: Option<usize>,
        max_snapshots: usize,
    ) -> Result<Self, String> {
        match (snapshots.is_empty(), current) {
            (true, None) => {}
            (true, Some(i)) => return Err(format!("cursor {i} on empty history")),
            (false, None) => return Err("non-empty history without a cursor".to_string()),
            (false, Some(i)) if i >= snapshots.len() => {
                return Err(format!("cursor {i} out of bounds for {} snapshots", snapshots.len()));
            }
            (false, Some(_)) => {}
        }
        let max_snapshots = max_snapshots.max(1);
        if snapshots.len() > max_snapshots {
            return Err(format!(
                "{} snapshots exceed the limit of {max_snapshots}",
                snapshots.len()
            ));
        }
        Ok(Self {
            snapshots,
            current,
            max_snapshots,
        })
    }

    /// Append after the cursor, discarding any redo tail, then evict the
    /// oldest entries beyond the limit.
    pub fn push(&mut self, snapshot: StoredSnapshot) -> PushOutcome {
        let mut outcome = PushOutcome::default();

        if let Some(current) = self.current {
            let keep = current + 1;
            outcome.truncated = self.snapshots.len().saturating_sub(keep);
            self.snapshots.truncate(keep);
        }

        self.snapshots.push(snapshot);
        self.current = Some(self.snapshots.len() - 1);

        while self.snapshots.len() > self.max_snapshots {
            // The cursor sits on the newest entry here, so the oldest is never it.
            let removed = self.snapshots.remove(0);
            self.current = self.current.map(|c| c.saturating_sub(1));
            outcome.evicted.push(removed.id);
        }

        outcome
    }

    pub fn can_undo(&self) -> bool {
        self.current.is_some_and(|c| c > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.current.is_some_and(|c| c + 1 < self.snapshots.len())
    }

    /// Move the cursor one step back. `None` at the start of history.
    pub fn step_back(&mut self) -> Option<&StoredSnapshot> {
        if !self.can_undo() {
            return None;
        }
        let idx = self.current? - 1;
        self.current = Some(idx);
        self.snapshots.get(idx)
    }

    /// Move the cursor one step forward. `None` at the end of history.
    pub fn step_forward(&mut self) -> Option<&StoredSnapshot> {
        if !self.can_redo() {
            return None;
        }
        let idx = self.current? + 1;
        self.current = Some(idx);
        self.snapshots.get(idx)
    }

    pub fn current(&self) -> Option<&StoredSnapshot> {
        self.current.and_then(|c| self.snapshots.get(c))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn find(&self, id: Uuid) -> Option<&StoredSnapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    pub fn snapshots(&self) -> &[StoredSnapshot] {
        &self.snapshots
    }

    pub(crate) fn snapshots_mut(&mut self) -> &mut [StoredSnapshot] {
        &mut self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.current = None;
    }
}
