//! Conflict detection and resolution between the local draft and the
//! copy last seen on the server.
//!
//! A conflict exists when the remote draft was updated strictly after the
//! point the local session last synchronized from, while local edits are
//! still unsaved. Each conflict is resolved exactly once, then moves to the
//! audit list.
//!
//! ```text
//!   local (dirty) ──┐
//!                   ├── detect ──► ConflictResolution (active)
//!   remote (newer) ─┘                     │
//!                       resolve(strategy) ▼
//!          local-wins | server-wins | merge (manual map / last write per field)
//!                                         │
//!                                         ▼
//!                              ResolvedConflict + audit entry
//! ```

use std::collections::{BTreeMap, BTreeSet};

use lander_core::{path, ChangeEvent, DocumentState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Top-level keys that are bookkeeping, not user content.
const IGNORED_KEYS: &[&str] = &["token_id", "last_updated"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Keep local state and save over the remote on the next flush.
    LocalWins,
    /// Adopt the remote state wholesale; queued local changes are dropped.
    ServerWins,
    /// Field-by-field, from an explicit map or the last-write heuristic.
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Content,
    Structure,
    Theme,
    Mixed,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Content => "content",
            ConflictType::Structure => "structure",
            ConflictType::Theme => "theme",
            ConflictType::Mixed => "mixed",
        }
    }
}

/// How a field differs on the remote side relative to local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldChange {
    Modified,
    Added,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeHint {
    PreferLocal,
    PreferServer,
    Concat,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictField {
    pub path: String,
    /// `Null` when the field is absent locally.
    pub local_value: Value,
    /// `Null` when the field is absent remotely.
    pub remote_value: Value,
    pub kind: FieldChange,
    pub can_auto_merge: bool,
    pub suggested: MergeHint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub id: Uuid,
    pub conflict_type: ConflictType,
    pub local_snapshot: DocumentState,
    pub remote_snapshot: DocumentState,
    pub fields: Vec<ConflictField>,
    /// Local changes that were unsaved when the conflict was detected.
    pub local_changes: Vec<ChangeEvent>,
    pub last_synced: u64,
    pub detected_at: u64,
    pub resolved_at: Option<u64>,
    pub strategy: Option<ResolutionStrategy>,
    pub resolutions: Option<BTreeMap<String, Value>>,
}

impl ConflictResolution {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// The local side of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct LocalState<'a> {
    pub document: &'a DocumentState,
    pub is_dirty: bool,
    /// `last_updated` of the remote draft this session last synchronized from.
    pub last_synced: u64,
    pub queued_changes: &'a [ChangeEvent],
}

/// Result of resolving a conflict, ready to be applied to the live document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConflict {
    pub conflict_id: Uuid,
    pub strategy: ResolutionStrategy,
    pub state: DocumentState,
    /// The remote `last_updated` the resolved state is now based on.
    pub remote_updated_at: u64,
}

#[derive(Debug, Default)]
pub struct ConflictResolver {
    active: Vec<ConflictResolution>,
    resolved: Vec<ConflictResolution>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare local and remote state. Registers and returns a conflict if
    /// the remote is newer than the last sync and local edits are unsaved.
    pub fn detect(
        &mut self,
        local: LocalState<'_>,
        remote: &DocumentState,
        now: u64,
    ) -> Option<ConflictResolution> {
        if !local.is_dirty || remote.last_updated <= local.last_synced {
            return None;
        }

        let fields = diff_documents(local.document, remote);
        let conflict = ConflictResolution {
            id: Uuid::new_v4(),
            conflict_type: categorize(&fields),
            local_snapshot: local.document.clone(),
            remote_snapshot: remote.clone(),
            fields,
            local_changes: local.queued_changes.to_vec(),
            last_synced: local.last_synced,
            detected_at: now,
            resolved_at: None,
            strategy: None,
            resolutions: None,
        };

        log::warn!(
            "Conflict {} detected: type={} fields={} auto-mergeable={} (remote {} > synced {})",
            conflict.id,
            conflict.conflict_type.as_str(),
            conflict.fields.len(),
            conflict.fields.iter().filter(|f| f.can_auto_merge).count(),
            remote.last_updated,
            local.last_synced,
        );

        self.active.push(conflict.clone());
        Some(conflict)
    }

    /// Resolve an active conflict. `resolutions` only applies to
    /// [`ResolutionStrategy::Merge`]; without it the last-write heuristic
    /// runs instead.
    pub fn resolve(
        &mut self,
        id: Uuid,
        strategy: ResolutionStrategy,
        resolutions: Option<BTreeMap<String, Value>>,
        now: u64,
    ) -> EngineResult<ResolvedConflict> {
        let idx = self
            .active
            .iter()
            .position(|c| c.id == id)
            .ok_or(EngineError::ConflictNotFound(id))?;

        let state = {
            let conflict = &self.active[idx];
            match (strategy, &resolutions) {
                (ResolutionStrategy::LocalWins, _) => conflict.local_snapshot.clone(),
                (ResolutionStrategy::ServerWins, _) => conflict.remote_snapshot.clone(),
                (ResolutionStrategy::Merge, Some(map)) => merge_manual(conflict, map)?,
                (ResolutionStrategy::Merge, None) => merge_last_write(conflict)?,
            }
        };

        let mut conflict = self.active.remove(idx);
        let remote_updated_at = conflict.remote_snapshot.last_updated;
        conflict.resolved_at = Some(now);
        conflict.strategy = Some(strategy);
        conflict.resolutions = resolutions;

        log::info!(
            "Conflict {id} resolved with {:?} ({} fields)",
            strategy,
            conflict.fields.len()
        );
        self.resolved.push(conflict);

        Ok(ResolvedConflict {
            conflict_id: id,
            strategy,
            state,
            remote_updated_at,
        })
    }

    /// Merge using "last write per field".
    pub fn auto_resolve(&mut self, id: Uuid, now: u64) -> EngineResult<ResolvedConflict> {
        self.resolve(id, ResolutionStrategy::Merge, None, now)
    }

    /// Merge using an explicit `path → value` map over the local state.
    pub fn manual_resolve(
        &mut self,
        id: Uuid,
        resolutions: BTreeMap<String, Value>,
        now: u64,
    ) -> EngineResult<ResolvedConflict> {
        self.resolve(id, ResolutionStrategy::Merge, Some(resolutions), now)
    }

    pub fn active_conflicts(&self) -> &[ConflictResolution] {
        &self.active
    }

    pub fn resolved_conflicts(&self) -> &[ConflictResolution] {
        &self.resolved
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn first_active(&self) -> Option<Uuid> {
        self.active.first().map(|c| c.id)
    }

    /// e.g. `"2 conflict(s): content, theme"`; empty when none are active.
    pub fn summary(&self) -> String {
        if self.active.is_empty() {
            return String::new();
        }
        let types: BTreeSet<&str> = self.active.iter().map(|c| c.conflict_type.as_str()).collect();
        format!(
            "{} conflict(s): {}",
            self.active.len(),
            types.into_iter().collect::<Vec<_>>().join(", ")
        )
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}

fn merge_manual(
    conflict: &ConflictResolution,
    resolutions: &BTreeMap<String, Value>,
) -> EngineResult<DocumentState> {
    let mut merged = conflict.local_snapshot.to_value()?;
    for (field_path, value) in resolutions {
        if IGNORED_KEYS.contains(&field_path.as_str()) {
            return Err(EngineError::Validation(format!(
                "{field_path} cannot be resolved manually"
            )));
        }
        path::set(&mut merged, field_path, value.clone())?;
    }
    finish_merge(merged, conflict)
}

/// For every differing field, the local value stands only if an unsaved
/// local change wrote that field after the remote was last updated.
fn merge_last_write(conflict: &ConflictResolution) -> EngineResult<DocumentState> {
    let remote_at = conflict.remote_snapshot.last_updated;
    let mut merged = conflict.local_snapshot.to_value()?;

    for field in &conflict.fields {
        let local_is_newer = conflict
            .local_changes
            .iter()
            .any(|c| c.timestamp > remote_at && touches(&c.field_path(), &field.path));
        if !local_is_newer {
            path::set(&mut merged, &field.path, field.remote_value.clone())?;
        }
    }
    finish_merge(merged, conflict)
}

fn finish_merge(merged: Value, conflict: &ConflictResolution) -> EngineResult<DocumentState> {
    let mut state = DocumentState::from_value(merged)?;
    state.token_id = conflict.local_snapshot.token_id.clone();
    state.last_updated = conflict.remote_snapshot.last_updated;
    Ok(state)
}

/// A change at `change_path` wrote `field_path` if the paths are equal or
/// one contains the other.
fn touches(change_path: &str, field_path: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        inner.len() > outer.len()
            && inner.starts_with(outer)
            && inner.as_bytes()[outer.len()] == b'.'
    };
    change_path == field_path || nested(change_path, field_path) || nested(field_path, change_path)
}

/// Field-level differences between two drafts, bookkeeping keys excluded.
/// Arrays are compared as whole values.
pub fn diff_documents(local: &DocumentState, remote: &DocumentState) -> Vec<ConflictField> {
    let (Ok(mut local), Ok(mut remote)) = (local.to_value(), remote.to_value()) else {
        return Vec::new();
    };
    for key in IGNORED_KEYS {
        if let Some(obj) = local.as_object_mut() {
            obj.remove(*key);
        }
        if let Some(obj) = remote.as_object_mut() {
            obj.remove(*key);
        }
    }
    let mut out = Vec::new();
    diff_values(&local, &remote, "", &mut out);
    out
}

fn diff_values(local: &Value, remote: &Value, at: &str, out: &mut Vec<ConflictField>) {
    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
            for key in keys {
                let field_path = path::join(at, key);
                match (l.get(key), r.get(key)) {
                    (None, Some(rv)) => out.push(ConflictField {
                        path: field_path,
                        local_value: Value::Null,
                        remote_value: rv.clone(),
                        kind: FieldChange::Added,
                        can_auto_merge: true,
                        suggested: MergeHint::PreferServer,
                    }),
                    (Some(lv), None) => out.push(ConflictField {
                        path: field_path,
                        local_value: lv.clone(),
                        remote_value: Value::Null,
                        kind: FieldChange::Deleted,
                        can_auto_merge: false,
                        suggested: MergeHint::Manual,
                    }),
                    (Some(lv), Some(rv)) => diff_values(lv, rv, &field_path, out),
                    (None, None) => {}
                }
            }
        }
        (l, r) if l != r => out.push(ConflictField {
            path: at.to_string(),
            local_value: l.clone(),
            remote_value: r.clone(),
            kind: FieldChange::Modified,
            can_auto_merge: can_auto_merge(l, r),
            suggested: suggest_merge(l, r),
        }),
        _ => {}
    }
}

fn can_auto_merge(local: &Value, remote: &Value) -> bool {
    match (local, remote) {
        (Value::String(l), Value::String(r)) => {
            l.trim().is_empty() || r.trim().is_empty() || l.contains(r.as_str()) || r.contains(l.as_str())
        }
        (Value::Array(_), Value::Array(_)) => true,
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => (l - r).abs() < 0.1,
            _ => false,
        },
        _ => false,
    }
}

fn suggest_merge(local: &Value, remote: &Value) -> MergeHint {
    match (local, remote) {
        (Value::String(l), _) if l.trim().is_empty() => MergeHint::PreferServer,
        (_, Value::String(r)) if r.trim().is_empty() => MergeHint::PreferLocal,
        (Value::String(l), Value::String(r)) if l.len() > r.len() => MergeHint::PreferLocal,
        (Value::String(_), Value::String(_)) => MergeHint::PreferServer,
        (Value::Array(_), Value::Array(_)) => MergeHint::Concat,
        _ => MergeHint::Manual,
    }
}

fn categorize(fields: &[ConflictField]) -> ConflictType {
    let mut kinds = BTreeSet::new();
    for field in fields {
        let kind = if field.path.starts_with("theme") {
            ConflictType::Theme
        } else if field.path.starts_with("layout") {
            ConflictType::Structure
        } else {
            ConflictType::Content
        };
        kinds.insert(kind.as_str());
    }
    match kinds.len() {
        0 => ConflictType::Content,
        1 => match kinds.into_iter().next() {
            Some("theme") => ConflictType::Theme,
            Some("structure") => ConflictType::Structure,
            _ => ConflictType::Content,
        },
        _ => ConflictType::Mixed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(headline: &str, updated: u64) -> DocumentState {
        let mut d = DocumentState::new("tok").with_section(
            "hero",
            [("headline", json!(headline)), ("cta", json!("Start"))],
        );
        d.last_updated = updated;
        d
    }

    fn local<'a>(d: &'a DocumentState, dirty: bool, synced: u64, changes: &'a [ChangeEvent]) -> LocalState<'a> {
        LocalState {
            document: d,
            is_dirty: dirty,
            last_synced: synced,
            queued_changes: changes,
        }
    }

    #[test]
    fn test_detect_when_remote_newer_and_dirty() {
        let mut resolver = ConflictResolver::new();
        let l = doc("Local", 100);
        let r = doc("Remote", 200);
        let conflict = resolver.detect(local(&l, true, 100, &[]), &r, 300).unwrap();

        assert_eq!(conflict.conflict_type, ConflictType::Content);
        assert_eq!(conflict.fields.len(), 1);
        assert_eq!(conflict.fields[0].path, "content.hero.headline");
        assert_eq!(conflict.fields[0].kind, FieldChange::Modified);
        assert!(resolver.has_active());
    }

    #[test]
    fn test_no_conflict_when_clean() {
        let mut resolver = ConflictResolver::new();
        let l = doc("Local", 100);
        let r = doc("Remote", 200);
        assert!(resolver.detect(local(&l, false, 100, &[]), &r, 300).is_none());
        assert!(!resolver.has_active());
    }

    #[test]
    fn test_no_conflict_when_remote_not_newer() {
        let mut resolver = ConflictResolver::new();
        let l = doc("Local", 100);
        let r = doc("Remote", 100);
        assert!(resolver.detect(local(&l, true, 100, &[]), &r, 300).is_none());
    }

    #[test]
    fn test_local_and_server_wins() {
        let mut resolver = ConflictResolver::new();
        let l = doc("Local", 100);
        let r = doc("Remote", 200);

        let c1 = resolver.detect(local(&l, true, 100, &[]), &r, 1).unwrap();
        let out = resolver.resolve(c1.id, ResolutionStrategy::LocalWins, None, 2).unwrap();
        assert_eq!(out.state.element("hero", "headline"), Some(&json!("Local")));
        assert_eq!(out.remote_updated_at, 200);

        let c2 = resolver.detect(local(&l, true, 100, &[]), &r, 3).unwrap();
        let out = resolver.resolve(c2.id, ResolutionStrategy::ServerWins, None, 4).unwrap();
        assert_eq!(out.state, r);

        assert_eq!(resolver.resolved_conflicts().len(), 2);
        assert!(resolver.resolved_conflicts().iter().all(|c| c.is_resolved()));
    }

    #[test]
    fn test_resolved_exactly_once() {
        let mut resolver = ConflictResolver::new();
        let l = doc("Local", 100);
        let r = doc("Remote", 200);
        let c = resolver.detect(local(&l, true, 100, &[]), &r, 1).unwrap();

        resolver.resolve(c.id, ResolutionStrategy::LocalWins, None, 2).unwrap();
        let again = resolver.resolve(c.id, ResolutionStrategy::ServerWins, None, 3);
        assert_eq!(again, Err(EngineError::ConflictNotFound(c.id)));
    }

    #[test]
    fn test_manual_merge_applies_map_over_local() {
        let mut resolver = ConflictResolver::new();
        let l = doc("Local", 100);
        let mut r = doc("Remote", 200);
        r.theme.insert("accent".into(), json!("#123456"));
        let c = resolver.detect(local(&l, true, 100, &[]), &r, 1).unwrap();
        assert_eq!(c.conflict_type, ConflictType::Mixed);

        let mut map = BTreeMap::new();
        map.insert("content.hero.headline".to_string(), json!("Picked"));
        let out = resolver.manual_resolve(c.id, map, 2).unwrap();

        assert_eq!(out.state.element("hero", "headline"), Some(&json!("Picked")));
        // Not in the map: local value (absent) is kept.
        assert!(out.state.theme.get("accent").is_none());
        assert_eq!(out.state.last_updated, 200);
    }

    #[test]
    fn test_last_write_per_field() {
        let mut resolver = ConflictResolver::new();
        let mut l = doc("Local headline", 100);
        l.content.get_mut("hero").unwrap().insert("cta".into(), json!("Local CTA"));
        let mut r = doc("Remote headline", 200);
        r.content.get_mut("hero").unwrap().insert("cta".into(), json!("Remote CTA"));

        // Headline edited locally after the remote update; CTA edited before.
        let changes = vec![
            ChangeEvent::content("hero", "headline", json!("x"), json!("Local headline"), 250),
            ChangeEvent::content("hero", "cta", json!("Start"), json!("Local CTA"), 150),
        ];
        let c = resolver.detect(local(&l, true, 100, &changes), &r, 300).unwrap();
        let out = resolver.auto_resolve(c.id, 301).unwrap();

        assert_eq!(out.state.element("hero", "headline"), Some(&json!("Local headline")));
        assert_eq!(out.state.element("hero", "cta"), Some(&json!("Remote CTA")));
        assert_eq!(out.strategy, ResolutionStrategy::Merge);
    }

    #[test]
    fn test_diff_added_and_deleted_fields() {
        let l = doc("Same", 1);
        let mut r = doc("Same", 2);
        r.content.get_mut("hero").unwrap().remove("cta");
        r.meta.insert("seo".into(), json!("new"));

        let fields = diff_documents(&l, &r);
        let cta = fields.iter().find(|f| f.path == "content.hero.cta").unwrap();
        assert_eq!(cta.kind, FieldChange::Deleted);
        assert!(!cta.can_auto_merge);
        let seo = fields.iter().find(|f| f.path == "meta.seo").unwrap();
        assert_eq!(seo.kind, FieldChange::Added);
        assert_eq!(seo.suggested, MergeHint::PreferServer);
        assert!(fields.iter().all(|f| f.path != "last_updated"));
    }

    #[test]
    fn test_merge_hints() {
        assert_eq!(suggest_merge(&json!(""), &json!("x")), MergeHint::PreferServer);
        assert_eq!(suggest_merge(&json!("longer"), &json!("x")), MergeHint::PreferLocal);
        assert_eq!(suggest_merge(&json!([1]), &json!([2])), MergeHint::Concat);
        assert!(can_auto_merge(&json!("Get started"), &json!("Get started now")));
        assert!(!can_auto_merge(&json!(1), &json!(2)));
    }

    #[test]
    fn test_touches_matches_nested_paths() {
        assert!(touches("content.hero.headline", "content.hero.headline"));
        assert!(touches("content.hero", "content.hero.headline"));
        assert!(!touches("content.hero", "content.heroic.headline"));
    }

    #[test]
    fn test_summary() {
        let mut resolver = ConflictResolver::new();
        assert_eq!(resolver.summary(), "");
        let l = doc("Local", 100);
        let r = doc("Remote", 200);
        resolver.detect(local(&l, true, 100, &[]), &r, 1);
        assert_eq!(resolver.summary(), "1 conflict(s): content");
    }
}
