//! Immutable edit records.
//!
//! A [`ChangeEvent`] is built once by the editing operation that produced
//! it and never mutated afterwards; consumers clone it when they need to
//! keep it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::ValidationError;

/// What part of the draft an edit touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Content,
    Layout,
    Theme,
    Meta,
}

/// Who produced an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    User,
    Ai,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub kind: ChangeKind,
    /// Section id for content/layout edits, theme or meta key otherwise.
    pub target_id: String,
    pub field: Option<String>,
    pub old_value: Value,
    pub new_value: Value,
    pub source: ChangeSource,
    /// Milliseconds since epoch.
    pub timestamp: u64,
}

impl ChangeEvent {
    pub fn new(
        kind: ChangeKind,
        target_id: impl Into<String>,
        old_value: Value,
        new_value: Value,
        source: ChangeSource,
        timestamp: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target_id: target_id.into(),
            field: None,
            old_value,
            new_value,
            source,
            timestamp,
        }
    }

    /// User edit of one content element.
    pub fn content(
        section_id: impl Into<String>,
        element: impl Into<String>,
        old_value: Value,
        new_value: Value,
        timestamp: u64,
    ) -> Self {
        Self::new(
            ChangeKind::Content,
            section_id,
            old_value,
            new_value,
            ChangeSource::User,
            timestamp,
        )
        .with_field(element)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_source(mut self, source: ChangeSource) -> Self {
        self.source = source;
        self
    }

    /// Structural check: non-empty target, and a field for content edits.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target_id.trim().is_empty() {
            return Err(ValidationError::EmptyTarget(self.id));
        }
        if self.kind == ChangeKind::Content && self.field.is_none() {
            return Err(ValidationError::MissingField(self.id));
        }
        Ok(())
    }

    /// Whether the edit is worth tracking. No-op edits, blanked strings and
    /// bookkeeping timestamp updates are not.
    pub fn is_significant(&self) -> bool {
        if self.kind == ChangeKind::Meta
            && matches!(self.field.as_deref(), Some("last_updated" | "lastUpdated"))
        {
            return false;
        }
        if self.old_value == self.new_value {
            return false;
        }
        if let Value::String(s) = &self.new_value {
            if s.trim().is_empty() {
                return false;
            }
        }
        true
    }

    /// Dotted path (see [`crate::path`]) of the document field this edit writes.
    pub fn field_path(&self) -> String {
        let target = &self.target_id;
        match (self.kind, self.field.as_deref()) {
            (ChangeKind::Content, Some(field)) => format!("content.{target}.{field}"),
            (ChangeKind::Content, None) => format!("content.{target}"),
            (ChangeKind::Layout, Some(_)) => format!("layout.section_layouts.{target}"),
            (ChangeKind::Layout, None) => "layout.sections".to_string(),
            (ChangeKind::Theme, field) => format!("theme.{}", field.unwrap_or(target)),
            (ChangeKind::Meta, field) => match field.unwrap_or(target) {
                "title" => "title".to_string(),
                key => format!("meta.{key}"),
            },
        }
    }
}
