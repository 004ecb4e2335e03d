//! Version manager: snapshot creation, undo/redo, compression of aging
//! snapshots, history export, and the conflict API surface.
//!
//! ```text
//!   create_snapshot(doc) ──► StoredSnapshot{Plain} ──► VersionHistory.push
//!                                                         │
//!                        compress_old_snapshots(now) ◄────┘
//!                         (Plain → Compressed once older than compress_after_ms)
//!
//!   undo/redo/get/current ──► decode through SnapshotCodec ──► Snapshot
//! ```

use std::collections::BTreeMap;

use lander_core::{ChangeEvent, DocumentState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::codec::{Lz4JsonCodec, SnapshotCodec};
use crate::config::VersionConfig;
use crate::conflict::{
    ConflictResolution, ConflictResolver, LocalState, ResolutionStrategy, ResolvedConflict,
};
use crate::error::{EngineError, EngineResult};
use crate::snapshot::{Snapshot, SnapshotOrigin, SnapshotPayload, StoredSnapshot, VersionHistory};

/// Read-only view of the history for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub can_undo: bool,
    pub can_redo: bool,
    pub current_version: Option<u64>,
    pub current_index: Option<usize>,
    pub total_snapshots: usize,
    /// Sum of uncompressed snapshot sizes in bytes.
    pub total_size: usize,
    pub oldest: Option<u64>,
    pub newest: Option<u64>,
}

/// Serializable form of the whole history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryExport {
    pub snapshots: Vec<StoredSnapshot>,
    pub current_index: Option<usize>,
    pub max_snapshots: usize,
    /// Name of the codec compressed payloads were written with.
    pub codec: String,
    pub exported_at: u64,
}

pub struct VersionManager {
    history: VersionHistory,
    config: VersionConfig,
    codec: Box<dyn SnapshotCodec>,
    conflicts: ConflictResolver,
    next_version: u64,
}

impl VersionManager {
    pub fn new(config: VersionConfig) -> Self {
        Self::with_codec(config, Box::new(Lz4JsonCodec))
    }

    pub fn with_codec(config: VersionConfig, codec: Box<dyn SnapshotCodec>) -> Self {
        Self {
            history: VersionHistory::new(config.max_snapshots),
            config,
            codec,
            conflicts: ConflictResolver::new(),
            next_version: 1,
        }
    }

    pub fn config(&self) -> &VersionConfig {
        &self.config
    }

    /// Record a full copy of `data`. Discards any redo tail and evicts the
    /// oldest snapshots beyond `max_snapshots`.
    pub fn create_snapshot(
        &mut self,
        data: &DocumentState,
        description: &str,
        origin: SnapshotOrigin,
        source_changes: Vec<ChangeEvent>,
        now: u64,
    ) -> EngineResult<Uuid> {
        if let Some(bad) = source_changes.iter().find_map(|c| c.validate().err()) {
            log::error!("Dropping snapshot '{description}': {bad}");
            return Err(bad.into());
        }

        let snapshot = StoredSnapshot {
            id: Uuid::new_v4(),
            version: self.next_version,
            timestamp: now,
            description: description.to_string(),
            origin,
            source_changes,
            tags: generate_tags(description, origin),
            size: data.encoded_size(),
            payload: SnapshotPayload::Plain(data.clone()),
        };
        self.next_version += 1;

        let id = snapshot.id;
        let version = snapshot.version;
        let size = snapshot.size;
        let outcome = self.history.push(snapshot);

        if outcome.truncated > 0 {
            log::debug!("Discarded {} redo snapshot(s)", outcome.truncated);
        }
        for evicted in &outcome.evicted {
            log::debug!("Evicted snapshot {evicted} (limit {})", self.history.max_snapshots());
        }
        if self.config.enable_compression {
            self.compress_old_snapshots(now);
        }

        log::debug!(
            "Snapshot v{version} created: '{description}' origin={} size={:.2}KB",
            origin.as_str(),
            size as f64 / 1024.0
        );
        Ok(id)
    }

    /// True once enough changes have accumulated for an auto-snapshot.
    pub fn should_create_auto_snapshot(&self, change_count: usize) -> bool {
        change_count >= self.config.auto_snapshot_interval
    }

    /// Compress every plain snapshot older than `compress_after_ms`.
    /// Returns how many were compressed.
    pub fn compress_old_snapshots(&mut self, now: u64) -> usize {
        let threshold = self.config.compress_after_ms;
        let codec = &self.codec;
        let mut compressed = 0;

        for snapshot in self.history.snapshots_mut() {
            if now.saturating_sub(snapshot.timestamp) <= threshold {
                continue;
            }
            let SnapshotPayload::Plain(state) = &snapshot.payload else {
                continue;
            };
            match codec.encode(state) {
                Ok(encoded) => {
                    snapshot.payload = SnapshotPayload::Compressed(encoded);
                    compressed += 1;
                }
                Err(e) => log::warn!("Leaving snapshot v{} uncompressed: {e}", snapshot.version),
            }
        }
        if compressed > 0 {
            log::debug!("Compressed {compressed} snapshot(s) with {}", codec.name());
        }
        compressed
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Step back one snapshot. `None` at the start of history.
    pub fn undo(&mut self) -> Option<Snapshot> {
        let stored = self.history.step_back()?.clone();
        match self.decode(stored) {
            Ok(snapshot) => {
                log::info!("Undo to v{}: {}", snapshot.version, snapshot.description);
                Some(snapshot)
            }
            Err(e) => {
                log::error!("Undo target unreadable, staying put: {e}");
                self.history.step_forward();
                None
            }
        }
    }

    /// Step forward one snapshot. `None` at the end of history.
    pub fn redo(&mut self) -> Option<Snapshot> {
        let stored = self.history.step_forward()?.clone();
        match self.decode(stored) {
            Ok(snapshot) => {
                log::info!("Redo to v{}: {}", snapshot.version, snapshot.description);
                Some(snapshot)
            }
            Err(e) => {
                log::error!("Redo target unreadable, staying put: {e}");
                self.history.step_back();
                None
            }
        }
    }

    pub fn current_snapshot(&self) -> Option<Snapshot> {
        let stored = self.history.current()?.clone();
        self.decode(stored).ok()
    }

    pub fn get_snapshot(&self, id: Uuid) -> Option<Snapshot> {
        let stored = self.history.find(id)?.clone();
        match self.decode(stored) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::error!("Snapshot {id} unreadable: {e}");
                None
            }
        }
    }

    pub fn history(&self) -> &VersionHistory {
        &self.history
    }

    pub fn history_summary(&self) -> HistorySummary {
        let snapshots = self.history.snapshots();
        HistorySummary {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
            current_version: self.history.current().map(|s| s.version),
            current_index: self.history.current_index(),
            total_snapshots: snapshots.len(),
            total_size: snapshots.iter().map(|s| s.size).sum(),
            oldest: snapshots.first().map(|s| s.timestamp),
            newest: snapshots.last().map(|s| s.timestamp),
        }
    }

    /// Drop all snapshots and conflicts. Version numbers keep counting.
    pub fn clear(&mut self) {
        self.history.clear();
        self.conflicts.clear();
        log::info!("Version history cleared");
    }

    pub fn export_history(&self, now: u64) -> HistoryExport {
        HistoryExport {
            snapshots: self.history.snapshots().to_vec(),
            current_index: self.history.current_index(),
            max_snapshots: self.history.max_snapshots(),
            codec: self.codec.name().to_string(),
            exported_at: now,
        }
    }

    pub fn export_history_json(&self, now: u64) -> EngineResult<String> {
        serde_json::to_string(&self.export_history(now))
            .map_err(|e| EngineError::Validation(format!("history export failed: {e}")))
    }

    /// Replace the history with an export. On any validation failure the
    /// current history is left untouched.
    pub fn import_history(&mut self, export: HistoryExport) -> EngineResult<()> {
        let has_compressed = export.snapshots.iter().any(StoredSnapshot::is_compressed);
        if has_compressed && export.codec != self.codec.name() {
            return Err(EngineError::Validation(format!(
                "history was compressed with {}, this manager uses {}",
                export.codec,
                self.codec.name()
            )));
        }
        for snapshot in &export.snapshots {
            if let SnapshotPayload::Compressed(encoded) = &snapshot.payload {
                self.codec.decode(encoded)?;
            }
            for change in &snapshot.source_changes {
                change.validate()?;
            }
        }

        let next_version = export.snapshots.iter().map(|s| s.version).max().unwrap_or(0) + 1;
        let count = export.snapshots.len();
        self.history = VersionHistory::from_parts(
            export.snapshots,
            export.current_index,
            self.config.max_snapshots,
        )
        .map_err(EngineError::Validation)?;
        self.next_version = self.next_version.max(next_version);
        log::info!("Imported {count} snapshot(s)");
        Ok(())
    }

    pub fn import_history_json(&mut self, json: &str) -> EngineResult<()> {
        let export: HistoryExport = serde_json::from_str(json)
            .map_err(|e| EngineError::Validation(format!("history import failed: {e}")))?;
        self.import_history(export)
    }

    pub fn detect_conflict(
        &mut self,
        local: LocalState<'_>,
        remote: &DocumentState,
        now: u64,
    ) -> Option<ConflictResolution> {
        self.conflicts.detect(local, remote, now)
    }

    /// Resolve an active conflict and bracket it with two system snapshots:
    /// the live state just before, and the resolved state. `current` is the
    /// live document; local-wins keeps it as-is.
    pub fn resolve_conflict(
        &mut self,
        id: Uuid,
        strategy: ResolutionStrategy,
        resolutions: Option<BTreeMap<String, Value>>,
        current: &DocumentState,
        now: u64,
    ) -> EngineResult<ResolvedConflict> {
        let mut resolved = self.conflicts.resolve(id, strategy, resolutions, now)?;
        if strategy == ResolutionStrategy::LocalWins {
            resolved.state = current.clone();
        }

        self.create_snapshot(
            current,
            "Before conflict resolution",
            SnapshotOrigin::System,
            Vec::new(),
            now,
        )?;
        self.create_snapshot(
            &resolved.state,
            &format!("Conflict resolved ({})", strategy_name(strategy)),
            SnapshotOrigin::System,
            Vec::new(),
            now,
        )?;
        Ok(resolved)
    }

    pub fn auto_resolve_conflicts(
        &mut self,
        id: Uuid,
        current: &DocumentState,
        now: u64,
    ) -> EngineResult<ResolvedConflict> {
        self.resolve_conflict(id, ResolutionStrategy::Merge, None, current, now)
    }

    pub fn manual_resolve_conflict(
        &mut self,
        id: Uuid,
        resolutions: BTreeMap<String, Value>,
        current: &DocumentState,
        now: u64,
    ) -> EngineResult<ResolvedConflict> {
        self.resolve_conflict(id, ResolutionStrategy::Merge, Some(resolutions), current, now)
    }

    pub fn active_conflicts(&self) -> &[ConflictResolution] {
        self.conflicts.active_conflicts()
    }

    pub fn resolved_conflicts(&self) -> &[ConflictResolution] {
        self.conflicts.resolved_conflicts()
    }

    pub fn first_active_conflict(&self) -> Option<Uuid> {
        self.conflicts.first_active()
    }

    pub fn conflict_summary(&self) -> String {
        self.conflicts.summary()
    }

    fn decode(&self, stored: StoredSnapshot) -> EngineResult<Snapshot> {
        let data = match &stored.payload {
            SnapshotPayload::Plain(state) => state.clone(),
            SnapshotPayload::Compressed(encoded) => self.codec.decode(encoded)?,
        };
        Ok(stored.into_view(data))
    }
}

fn strategy_name(strategy: ResolutionStrategy) -> &'static str {
    match strategy {
        ResolutionStrategy::LocalWins => "local-wins",
        ResolutionStrategy::ServerWins => "server-wins",
        ResolutionStrategy::Merge => "merge",
    }
}

fn generate_tags(description: &str, origin: SnapshotOrigin) -> Vec<String> {
    let lower = description.to_lowercase();
    let mut tags = vec![origin.as_str().to_string()];
    let keywords = [
        ("save", "save"),
        ("ai", "ai-generated"),
        ("theme", "theme-change"),
        ("content", "content-change"),
        ("layout", "layout-change"),
    ];
    tags.extend(
        keywords
            .iter()
            .filter(|(needle, _)| lower.contains(needle))
            .map(|(_, tag)| tag.to_string()),
    );
    tags
}
