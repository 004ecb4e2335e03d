//! Draft session: one editable document wired to its tracker, history,
//! conflict resolver and save scheduler.
//!
//! ```text
//!   record_change ──► DocumentStore.apply_change
//!        │──► ChangeTracker (queue, dirty, edit seq)
//!        │──► VersionManager (auto-snapshot every N changes)
//!        └──► SaveScheduler.request ──notify──┐
//!                                             ▼
//!   AutoSaveTask: select! { tick | debounce deadline | notify | connectivity | shutdown }
//!                                             │
//!                                             ▼
//!             attempt_save: [remote check] ──► PersistenceGateway.save_draft
//! ```
//!
//! All session state sits behind one mutex that is never held across an
//! `.await`; the only suspension points are gateway calls and timers.
//! Saves are serialized by a separate async permit, so a manual save
//! queues behind one already in flight instead of racing it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lander_core::{ChangeEvent, DocumentState, DocumentStore};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::clock::ClockAndConnectivity;
use crate::config::EngineConfig;
use crate::conflict::{ConflictResolution, LocalState, ResolutionStrategy};
use crate::error::{EngineError, EngineResult};
use crate::gateway::PersistenceGateway;
use crate::scheduler::{AutoSaveState, PerformanceStats, SaveScheduler, SaveStatus};
use crate::snapshot::{Snapshot, SnapshotOrigin};
use crate::tracker::ChangeTracker;
use crate::version_manager::{HistoryExport, HistorySummary, VersionManager};

/// What a load or refresh did to the local document.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The remote draft replaced the local document.
    Loaded,
    /// No remote draft exists; local state kept.
    NotFound,
    /// Local edits are unsaved and the remote is not newer; local kept.
    KeptLocal,
    /// A conflict was detected and awaits resolution.
    Conflict(ConflictResolution),
    /// A conflict was detected and resolved with the configured strategy.
    AutoResolved(ResolutionStrategy),
}

/// Result of one save attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Saved,
    /// A conflict found by the remote check was auto-resolved instead.
    Resolved,
    /// An earlier save already covered every edit.
    Skipped,
}

struct SessionState {
    store: Box<dyn DocumentStore>,
    tracker: ChangeTracker,
    versions: VersionManager,
    scheduler: SaveScheduler,
    /// `last_updated` of the remote draft the local edits are based on.
    last_synced: u64,
}

struct Shared {
    token_id: String,
    config: EngineConfig,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn ClockAndConnectivity>,
    state: Mutex<SessionState>,
    /// Held from payload capture until the gateway answers.
    save_permit: AsyncMutex<()>,
    wake: Notify,
}

/// Handle to an editing session. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct DraftSession {
    inner: Arc<Shared>,
}

impl DraftSession {
    /// Wrap `store` in a session. The current document becomes the first
    /// snapshot, so undo can always return to it.
    pub fn new(
        token_id: impl Into<String>,
        store: Box<dyn DocumentStore>,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn ClockAndConnectivity>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let token_id = token_id.into();

        let initial = store.export();
        let mut versions = VersionManager::new(config.versioning.clone());
        versions.create_snapshot(
            &initial,
            "Initial state",
            SnapshotOrigin::System,
            Vec::new(),
            clock.now_ms(),
        )?;

        let state = SessionState {
            tracker: ChangeTracker::new(config.auto_save.max_queue_size),
            scheduler: SaveScheduler::new(&config.auto_save),
            last_synced: initial.last_updated,
            store,
            versions,
        };
        log::info!("Draft session opened for {token_id}");

        Ok(Self {
            inner: Arc::new(Shared {
                token_id,
                config,
                gateway,
                clock,
                state: Mutex::new(state),
                save_permit: AsyncMutex::new(()),
                wake: Notify::new(),
            }),
        })
    }

    pub fn token_id(&self) -> &str {
        &self.inner.token_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    // ─── Editing ──────────────────────────────────────────────────────

    /// Apply an edit to the document and track it. Returns `false` when the
    /// change is malformed or cannot be applied; never errors.
    pub fn record_change(&self, change: ChangeEvent) -> bool {
        let online = self.inner.clock.is_online();
        let now = self.now_ms();
        let mut st = self.lock();

        if let Err(e) = change.validate() {
            log::warn!("Rejected change {}: {e}", change.id);
            return false;
        }
        if let Err(e) = st.store.apply_change(&change) {
            log::warn!("Change {} could not be applied: {e}", change.id);
            return false;
        }
        let significant = change.is_significant();
        st.tracker.record(change);
        if !significant {
            return true;
        }

        let pending = st.tracker.changes_since_snapshot();
        if st.versions.should_create_auto_snapshot(pending) {
            let changes = st.tracker.take_since_snapshot();
            let data = st.store.export();
            let description = format!("Auto-snapshot ({pending} changes)");
            if let Err(e) =
                st.versions
                    .create_snapshot(&data, &description, SnapshotOrigin::AutoSave, changes, now)
            {
                log::error!("Auto-snapshot failed: {e}");
            }
        }

        if st.scheduler.request(online, Instant::now()) {
            self.inner.wake.notify_one();
        }
        true
    }

    pub fn document(&self) -> DocumentState {
        self.lock().store.export()
    }

    /// Drop queued changes and consider the document clean.
    pub fn clear_queued_changes(&self) {
        self.lock().tracker.clear();
    }

    // ─── Saving ───────────────────────────────────────────────────────

    /// Ask for a debounced save. No-op while disabled or offline.
    pub fn trigger_save(&self) {
        let online = self.inner.clock.is_online();
        if self.lock().scheduler.request(online, Instant::now()) {
            self.inner.wake.notify_one();
        }
    }

    /// Save immediately, bypassing debounce, backoff and the enabled
    /// switch. Fails when offline or while a conflict is unresolved.
    pub async fn force_save(&self) -> EngineResult<()> {
        if !self.inner.clock.is_online() {
            log::warn!("Manual save of {} rejected: offline", self.inner.token_id);
            return Err(EngineError::OfflineRejection);
        }
        // One retry: an auto-resolved conflict leaves a fresh base to save on.
        for _ in 0..2 {
            let attempt = self.attempt_save(true).await?;
            let dirty = self.lock().tracker.is_dirty();
            if attempt == Attempt::Saved || !dirty {
                break;
            }
        }
        Ok(())
    }

    async fn attempt_save(&self, manual: bool) -> EngineResult<Attempt> {
        let token_id = self.inner.token_id.as_str();
        let config = &self.inner.config.auto_save;
        let _permit = self.inner.save_permit.lock().await;

        let (payload, seq, check_remote) = {
            let mut st = self.lock();
            if let Some(id) = st.versions.first_active_conflict() {
                return Err(EngineError::ConflictUnresolved(id));
            }
            if !manual && !st.tracker.is_dirty() {
                return Ok(Attempt::Skipped);
            }
            st.scheduler.begin_save();
            let mut payload = st.store.export();
            payload.last_updated = self.now_ms();
            let check = config.check_remote_before_save && st.tracker.queued_len() > 0;
            (payload, st.tracker.edit_seq(), check)
        };
        let started = Instant::now();
        log::debug!("Saving {token_id} (edit seq {seq})");

        if check_remote {
            match self.inner.gateway.load_draft(token_id).await {
                Ok(Some(remote)) => {
                    let mut st = self.lock();
                    if let Some(conflict) = self.detect_locked(&mut st, &remote) {
                        st.scheduler.abort_save();
                        return match self.auto_resolve_locked(&mut st, &conflict) {
                            Some(_) => {
                                drop(st);
                                self.inner.wake.notify_one();
                                Ok(Attempt::Resolved)
                            }
                            None => Err(EngineError::ConflictUnresolved(conflict.id)),
                        };
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("Remote check for {token_id} failed, saving anyway: {e}"),
            }
        }

        let result = self.inner.gateway.save_draft(token_id, &payload).await;
        let elapsed = started.elapsed().as_millis() as u64;
        let mut st = self.lock();

        match result {
            Ok(()) => {
                st.scheduler.finish_success(payload.last_updated, elapsed);
                st.last_synced = st.last_synced.max(payload.last_updated);
                let clean = st.tracker.acknowledge(seq);
                log::info!(
                    "Saved {token_id} in {elapsed}ms{}",
                    if clean { "" } else { " (newer edits pending)" }
                );
                if manual && config.snapshot_on_manual_save {
                    let changes = st.tracker.take_since_snapshot();
                    if let Err(e) = st.versions.create_snapshot(
                        &payload,
                        "Manual save",
                        SnapshotOrigin::User,
                        changes,
                        payload.last_updated,
                    ) {
                        log::error!("Manual save snapshot failed: {e}");
                    }
                }
                Ok(Attempt::Saved)
            }
            Err(e) => {
                let err = EngineError::SaveFailure(e.to_string());
                let delay = st.scheduler.finish_failure(err.clone(), Instant::now());
                log::warn!(
                    "Save of {token_id} failed ({} in a row), next automatic retry in {}ms: {e}",
                    st.scheduler.backoff().failures(),
                    delay.as_millis()
                );
                Err(err)
            }
        }
    }

    /// Save if the scheduler allows it. Errors are already recorded in
    /// the save state.
    async fn save_if_due(&self) {
        let due = {
            let st = self.lock();
            st.versions.first_active_conflict().is_none()
                && st.scheduler.should_attempt(
                    st.tracker.is_dirty(),
                    self.inner.clock.is_online(),
                    Instant::now(),
                )
        };
        if due {
            if let Err(e) = self.attempt_save(false).await {
                log::debug!("Automatic save did not complete: {e}");
            }
        }
    }

    fn on_connectivity(&self, online: bool) {
        log::info!(
            "{} is now {}",
            self.inner.token_id,
            if online { "online" } else { "offline" }
        );
        if online {
            self.lock().scheduler.on_online();
        }
    }

    pub fn set_auto_save_enabled(&self, enabled: bool) {
        self.lock().scheduler.set_enabled(enabled);
        self.inner.wake.notify_one();
    }

    pub fn clear_save_error(&self) {
        self.lock().scheduler.clear_error();
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        self.lock().scheduler.stats().clone()
    }

    pub fn reset_performance_stats(&self) {
        self.lock().scheduler.reset_stats();
    }

    pub fn status(&self) -> AutoSaveState {
        let online = self.inner.clock.is_online();
        let st = self.lock();
        AutoSaveState {
            is_dirty: st.tracker.is_dirty(),
            is_saving: st.scheduler.is_saving(),
            is_online: online,
            auto_save_enabled: st.scheduler.is_enabled(),
            last_saved: st.scheduler.last_saved(),
            save_error: st.scheduler.save_error().cloned(),
            queued_changes: st.tracker.queued_changes(),
            performance: st.scheduler.stats().clone(),
            consecutive_failures: st.scheduler.backoff().failures(),
            has_active_conflicts: !st.versions.active_conflicts().is_empty(),
        }
    }

    pub fn save_status(&self) -> SaveStatus {
        SaveStatus::from_state(&self.status(), self.now_ms())
    }

    // ─── Loading & conflicts ──────────────────────────────────────────

    /// Fetch the remote draft and reconcile it with local state.
    pub async fn load(&self) -> EngineResult<LoadOutcome> {
        let remote = self.inner.gateway.load_draft(&self.inner.token_id).await?;
        let Some(remote) = remote else {
            log::info!("No remote draft for {}", self.inner.token_id);
            return Ok(LoadOutcome::NotFound);
        };

        let mut st = self.lock();
        if let Some(conflict) = self.detect_locked(&mut st, &remote) {
            return Ok(match self.auto_resolve_locked(&mut st, &conflict) {
                Some(strategy) => LoadOutcome::AutoResolved(strategy),
                None => LoadOutcome::Conflict(conflict),
            });
        }
        if st.tracker.is_dirty() {
            return Ok(LoadOutcome::KeptLocal);
        }

        let now = self.now_ms();
        st.last_synced = remote.last_updated;
        // Our own saves come back with a newer stamp but the same content.
        let mut local = st.store.export();
        local.last_updated = remote.last_updated;
        if local != remote {
            st.store.load_from_draft(remote.clone());
            st.versions.create_snapshot(
                &remote,
                "Loaded from server",
                SnapshotOrigin::System,
                Vec::new(),
                now,
            )?;
        }
        log::info!("Loaded {} (updated {})", self.inner.token_id, remote.last_updated);
        Ok(LoadOutcome::Loaded)
    }

    /// Like [`load`](Self::load), for reconnects. Rejected while offline.
    pub async fn refresh_from_remote(&self) -> EngineResult<LoadOutcome> {
        if !self.inner.clock.is_online() {
            return Err(EngineError::OfflineRejection);
        }
        self.load().await
    }

    fn detect_locked(
        &self,
        st: &mut SessionState,
        remote: &DocumentState,
    ) -> Option<ConflictResolution> {
        let document = st.store.export();
        let queued = st.tracker.queued_changes();
        let local = LocalState {
            document: &document,
            is_dirty: st.tracker.is_dirty(),
            last_synced: st.last_synced,
            queued_changes: &queued,
        };
        let now = self.now_ms();
        st.versions.detect_conflict(local, remote, now)
    }

    /// Apply the configured strategy, if any. Returns it on success.
    fn auto_resolve_locked(
        &self,
        st: &mut SessionState,
        conflict: &ConflictResolution,
    ) -> Option<ResolutionStrategy> {
        let strategy = self.inner.config.conflict.auto_strategy?;
        match self.resolve_locked(st, conflict.id, strategy, None) {
            Ok(()) => Some(strategy),
            Err(e) => {
                log::error!("Automatic resolution of conflict {} failed: {e}", conflict.id);
                None
            }
        }
    }

    fn resolve_locked(
        &self,
        st: &mut SessionState,
        id: Uuid,
        strategy: ResolutionStrategy,
        resolutions: Option<BTreeMap<String, Value>>,
    ) -> EngineResult<()> {
        let current = st.store.export();
        let now = self.now_ms();
        let resolved = st
            .versions
            .resolve_conflict(id, strategy, resolutions, &current, now)?;

        st.last_synced = resolved.remote_updated_at;
        match strategy {
            ResolutionStrategy::LocalWins => {
                st.tracker.mark_dirty();
            }
            ResolutionStrategy::ServerWins => {
                st.store.load_from_draft(resolved.state);
                st.tracker.clear();
            }
            ResolutionStrategy::Merge => {
                st.store.load_from_draft(resolved.state);
                st.tracker.mark_dirty();
            }
        }
        Ok(())
    }

    /// Resolve an active conflict. `resolutions` maps field paths to values
    /// and only applies to [`ResolutionStrategy::Merge`].
    pub fn resolve_conflict(
        &self,
        id: Uuid,
        strategy: ResolutionStrategy,
        resolutions: Option<BTreeMap<String, Value>>,
    ) -> EngineResult<()> {
        let online = self.inner.clock.is_online();
        let mut st = self.lock();
        self.resolve_locked(&mut st, id, strategy, resolutions)?;
        if st.tracker.is_dirty() && st.scheduler.request(online, Instant::now()) {
            self.inner.wake.notify_one();
        }
        Ok(())
    }

    pub fn auto_resolve_conflicts(&self, id: Uuid) -> EngineResult<()> {
        self.resolve_conflict(id, ResolutionStrategy::Merge, None)
    }

    pub fn manual_resolve_conflict(
        &self,
        id: Uuid,
        resolutions: BTreeMap<String, Value>,
    ) -> EngineResult<()> {
        self.resolve_conflict(id, ResolutionStrategy::Merge, Some(resolutions))
    }

    pub fn active_conflicts(&self) -> Vec<ConflictResolution> {
        self.lock().versions.active_conflicts().to_vec()
    }

    pub fn resolved_conflicts(&self) -> Vec<ConflictResolution> {
        self.lock().versions.resolved_conflicts().to_vec()
    }

    pub fn conflict_summary(&self) -> String {
        self.lock().versions.conflict_summary()
    }

    // ─── History ──────────────────────────────────────────────────────

    /// Snapshot the live document on behalf of the user.
    pub fn create_snapshot(&self, description: &str) -> EngineResult<Uuid> {
        let now = self.now_ms();
        let mut st = self.lock();
        let data = st.store.export();
        let changes = st.tracker.take_since_snapshot();
        st.versions
            .create_snapshot(&data, description, SnapshotOrigin::User, changes, now)
    }

    /// Replace the document with the previous snapshot. `false` at the
    /// start of history.
    pub fn undo(&self) -> bool {
        self.step(VersionManager::undo)
    }

    pub fn redo(&self) -> bool {
        self.step(VersionManager::redo)
    }

    fn step(&self, walk: fn(&mut VersionManager) -> Option<Snapshot>) -> bool {
        let online = self.inner.clock.is_online();
        let mut st = self.lock();
        let Some(snapshot) = walk(&mut st.versions) else {
            return false;
        };
        st.store.load_from_draft(snapshot.data);
        st.tracker.mark_dirty();
        if st.scheduler.request(online, Instant::now()) {
            self.inner.wake.notify_one();
        }
        true
    }

    pub fn can_undo(&self) -> bool {
        self.lock().versions.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.lock().versions.can_redo()
    }

    pub fn current_snapshot(&self) -> Option<Snapshot> {
        self.lock().versions.current_snapshot()
    }

    pub fn history_summary(&self) -> HistorySummary {
        self.lock().versions.history_summary()
    }

    pub fn export_history(&self) -> HistoryExport {
        let now = self.now_ms();
        self.lock().versions.export_history(now)
    }

    /// Replace the history and render its current snapshot.
    pub fn import_history(&self, export: HistoryExport) -> EngineResult<()> {
        let mut st = self.lock();
        st.versions.import_history(export)?;
        if let Some(current) = st.versions.current_snapshot() {
            if current.data != st.store.export() {
                st.store.load_from_draft(current.data);
                st.tracker.mark_dirty();
            }
        }
        Ok(())
    }

    // ─── Background task ──────────────────────────────────────────────

    /// Spawn the auto-save loop on the current tokio runtime.
    pub fn start(&self) -> AutoSaveTask {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let session = self.clone();
        let handle = tokio::spawn(async move { session.run(shutdown_rx).await });
        log::info!("Auto-save started for {}", self.inner.token_id);
        AutoSaveTask {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let period = Duration::from_millis(self.inner.config.auto_save.tick_interval_ms);
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity = self.inner.clock.watch_connectivity();

        loop {
            let debounce = self.lock().scheduler.debounce_deadline();
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick.tick() => self.save_if_due().await,
                _ = wait_until(debounce) => {
                    let due = self.lock().scheduler.take_due_debounce(Instant::now());
                    if due {
                        self.save_if_due().await;
                    }
                }
                _ = self.inner.wake.notified() => {}
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        log::warn!("Connectivity source dropped");
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    self.on_connectivity(online);
                    if online {
                        self.save_if_due().await;
                    }
                }
            }
        }
        log::info!("Auto-save stopped for {}", self.inner.token_id);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Running auto-save loop. Dropping it aborts the loop; prefer
/// [`shutdown`](Self::shutdown) to let an in-flight save finish.
pub struct AutoSaveTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AutoSaveTask {
    /// Stop the loop after its current step and wait for it.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("Auto-save task ended abnormally: {e}");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for AutoSaveTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gateway::MemoryGateway;
    use lander_core::MemoryDocumentStore;
    use serde_json::json;

    fn session(config: EngineConfig) -> (DraftSession, Arc<MemoryGateway>, Arc<ManualClock>) {
        let doc = DocumentState::new("tok").with_section("hero", [("headline", json!("A"))]);
        let gateway = Arc::new(MemoryGateway::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let session = DraftSession::new(
            "tok",
            Box::new(MemoryDocumentStore::new(doc)),
            gateway.clone(),
            clock.clone(),
            config,
        )
        .unwrap();
        (session, gateway, clock)
    }

    fn headline(session: &DraftSession) -> Value {
        session.document().element("hero", "headline").cloned().unwrap_or(Value::Null)
    }

    fn edit(from: &str, to: &str, at: u64) -> ChangeEvent {
        ChangeEvent::content("hero", "headline", json!(from), json!(to), at)
    }

    #[test]
    fn test_scenario_auto_snapshot_undo_redo() {
        let (session, _, _) = session(EngineConfig::for_testing());
        assert!(session.record_change(edit("A", "B", 1_001)));
        assert_eq!(headline(&session), json!("B"));
        assert_eq!(session.history_summary().total_snapshots, 2);

        assert!(session.undo());
        assert_eq!(headline(&session), json!("A"));
        assert!(session.redo());
        assert_eq!(headline(&session), json!("B"));
        assert!(!session.redo());
    }

    #[test]
    fn test_rejects_malformed_change() {
        let (session, _, _) = session(EngineConfig::for_testing());
        let bad = ChangeEvent::content("", "headline", json!("A"), json!("B"), 1);
        assert!(!session.record_change(bad));
        assert!(!session.status().is_dirty);
    }

    #[tokio::test]
    async fn test_force_save_persists_and_snapshots() {
        let (session, gateway, _) = session(EngineConfig::for_testing());
        session.record_change(edit("A", "B", 1_001));
        session.force_save().await.unwrap();

        let saved = gateway.draft("tok").unwrap();
        assert_eq!(saved.element("hero", "headline"), Some(&json!("B")));
        assert_eq!(saved.last_updated, 1_000);

        let status = session.status();
        assert!(!status.is_dirty);
        assert_eq!(status.last_saved, Some(1_000));
        assert_eq!(status.performance.save_count, 1);
        let current = session.current_snapshot().unwrap();
        assert_eq!(current.description, "Manual save");
        assert_eq!(current.origin, SnapshotOrigin::User);
    }

    #[tokio::test]
    async fn test_force_save_offline_rejected() {
        let (session, gateway, clock) = session(EngineConfig::for_testing());
        clock.set_online(false);
        session.record_change(edit("A", "B", 1_001));
        assert_eq!(session.force_save().await, Err(EngineError::OfflineRejection));
        assert_eq!(gateway.save_count(), 0);
        assert!(session.status().is_dirty);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_dirty_and_sets_error() {
        let (session, gateway, _) = session(EngineConfig::for_testing());
        gateway.fail_next_saves(1);
        session.record_change(edit("A", "B", 1_001));

        let err = session.force_save().await.unwrap_err();
        assert!(matches!(err, EngineError::SaveFailure(_)));
        let status = session.status();
        assert!(status.is_dirty);
        assert_eq!(status.performance.failed_saves, 1);
        assert_eq!(status.consecutive_failures, 1);
        assert!(session.save_status().message.starts_with("Save failed"));

        session.force_save().await.unwrap();
        assert!(session.status().save_error.is_none());
        assert_eq!(session.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_load_replaces_clean_document() {
        let (session, gateway, _) = session(EngineConfig::for_testing());
        let mut remote = DocumentState::new("tok").with_section("hero", [("headline", json!("R"))]);
        remote.last_updated = 5_000;
        gateway.put_draft(remote);

        assert_eq!(session.load().await.unwrap(), LoadOutcome::Loaded);
        assert_eq!(headline(&session), json!("R"));
        assert!(session.can_undo());
    }

    #[tokio::test]
    async fn test_load_conflict_blocks_force_save() {
        let (session, gateway, _) = session(EngineConfig::for_testing());
        session.record_change(edit("A", "Local", 1_001));
        let mut remote = DocumentState::new("tok").with_section("hero", [("headline", json!("R"))]);
        remote.last_updated = 5_000;
        gateway.put_draft(remote);

        let LoadOutcome::Conflict(conflict) = session.load().await.unwrap() else {
            panic!("expected a conflict");
        };
        assert_eq!(headline(&session), json!("Local"));
        assert_eq!(
            session.force_save().await,
            Err(EngineError::ConflictUnresolved(conflict.id))
        );
        assert_eq!(session.save_status().message, "Conflict - resolve to resume saving");

        session
            .resolve_conflict(conflict.id, ResolutionStrategy::ServerWins, None)
            .unwrap();
        assert_eq!(headline(&session), json!("R"));
        assert!(!session.status().is_dirty);
        assert!(session.active_conflicts().is_empty());

        assert!(session.undo());
        assert_eq!(headline(&session), json!("Local"));
    }

    #[tokio::test]
    async fn test_configured_strategy_resolves_on_load() {
        let mut config = EngineConfig::for_testing();
        config.conflict.auto_strategy = Some(ResolutionStrategy::LocalWins);
        let (session, gateway, _) = session(config);
        session.record_change(edit("A", "Local", 1_001));
        let mut remote = DocumentState::new("tok").with_section("hero", [("headline", json!("R"))]);
        remote.last_updated = 5_000;
        gateway.put_draft(remote);

        assert_eq!(
            session.load().await.unwrap(),
            LoadOutcome::AutoResolved(ResolutionStrategy::LocalWins)
        );
        assert_eq!(headline(&session), json!("Local"));
        assert_eq!(session.resolved_conflicts().len(), 1);

        // Based on the remote now, so saving over it is allowed.
        session.force_save().await.unwrap();
        assert_eq!(
            gateway.draft("tok").unwrap().element("hero", "headline"),
            Some(&json!("Local"))
        );
    }

    #[test]
    fn test_import_history_renders_current() {
        let (source, _, _) = session(EngineConfig::for_testing());
        source.record_change(edit("A", "B", 1_001));
        source.record_change(edit("B", "C", 1_002));
        source.undo();
        let export = source.export_history();

        let (target, _, _) = session(EngineConfig::for_testing());
        target.import_history(export).unwrap();
        assert_eq!(headline(&target), json!("B"));
        assert!(target.can_redo());
    }
}
