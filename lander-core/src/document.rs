use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::change::{ChangeEvent, ChangeKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Change {0} has an empty target id")]
    EmptyTarget(Uuid),
    #[error("Content change {0} requires a field")]
    MissingField(Uuid),
    #[error("Invalid field path: {0}")]
    InvalidPath(String),
    #[error("Expected a string value for {0}")]
    ExpectedString(String),
    #[error("Document serialization failed: {0}")]
    Serialization(String),
}

/// Section ordering and the layout variant chosen for each section.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct PageLayout {
    pub sections: Vec<String>,
    pub section_layouts: BTreeMap<String, String>,
}

/// A complete, self-contained landing-page draft.
///
/// `content` maps section id → element key → value. `last_updated` is the
/// wall-clock time (ms since epoch) at which the draft was last persisted;
/// it is what conflict detection compares against.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct DocumentState {
    pub token_id: String,
    pub title: String,
    pub layout: PageLayout,
    pub content: BTreeMap<String, BTreeMap<String, Value>>,
    pub theme: BTreeMap<String, Value>,
    pub meta: BTreeMap<String, Value>,
    pub last_updated: u64,
}

impl DocumentState {
    pub fn new(token_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            ..Self::default()
        }
    }

    /// Add a section (appended to the layout order) with its elements.
    pub fn with_section<I, K>(mut self, section_id: &str, elements: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        if !self.layout.sections.iter().any(|s| s == section_id) {
            self.layout.sections.push(section_id.to_string());
        }
        let entry = self.content.entry(section_id.to_string()).or_default();
        for (key, value) in elements {
            entry.insert(key.into(), value);
        }
        self
    }

    /// Read a single content element.
    pub fn element(&self, section_id: &str, key: &str) -> Option<&Value> {
        self.content.get(section_id).and_then(|s| s.get(key))
    }

    /// Apply one edit in place.
    ///
    /// Does not validate old/new values beyond what is needed to place them.
    pub fn apply_change(&mut self, change: &ChangeEvent) -> Result<(), ValidationError> {
        change.validate()?;
        let target = change.target_id.as_str();

        match change.kind {
            ChangeKind::Content => {
                let field = change
                    .field
                    .as_deref()
                    .ok_or(ValidationError::MissingField(change.id))?;
                let section = self.content.entry(target.to_string()).or_default();
                if change.new_value.is_null() {
                    section.remove(field);
                } else {
                    section.insert(field.to_string(), change.new_value.clone());
                }
            }
            ChangeKind::Layout => match change.field.as_deref() {
                Some("layout") => match &change.new_value {
                    Value::Null => {
                        self.layout.section_layouts.remove(target);
                    }
                    Value::String(name) => {
                        self.layout
                            .section_layouts
                            .insert(target.to_string(), name.clone());
                    }
                    _ => return Err(ValidationError::ExpectedString(change.field_path())),
                },
                Some(other) => {
                    return Err(ValidationError::InvalidPath(format!("layout.{other}")));
                }
                None => self.apply_section_membership(target, &change.new_value),
            },
            ChangeKind::Theme => {
                let key = change.field.as_deref().unwrap_or(target);
                set_or_remove(&mut self.theme, key, &change.new_value);
            }
            ChangeKind::Meta => {
                let key = change.field.as_deref().unwrap_or(target);
                if key == "title" {
                    self.title = change
                        .new_value
                        .as_str()
                        .ok_or_else(|| ValidationError::ExpectedString("title".to_string()))?
                        .to_string();
                } else {
                    set_or_remove(&mut self.meta, key, &change.new_value);
                }
            }
        }
        Ok(())
    }

    /// Null removes the section; a number inserts it at that index;
    /// anything else appends it if missing.
    fn apply_section_membership(&mut self, section_id: &str, value: &Value) {
        let existing = self.layout.sections.iter().position(|s| s == section_id);
        match value {
            Value::Null => {
                if let Some(idx) = existing {
                    self.layout.sections.remove(idx);
                }
                self.layout.section_layouts.remove(section_id);
                self.content.remove(section_id);
            }
            Value::Number(n) => {
                if let Some(idx) = existing {
                    self.layout.sections.remove(idx);
                }
                let at = n
                    .as_u64()
                    .map_or(self.layout.sections.len(), |i| {
                        (i as usize).min(self.layout.sections.len())
                    });
                self.layout.sections.insert(at, section_id.to_string());
            }
            _ => {
                if existing.is_none() {
                    self.layout.sections.push(section_id.to_string());
                }
            }
        }
    }

    pub fn to_value(&self) -> Result<Value, ValidationError> {
        serde_json::to_value(self).map_err(|e| ValidationError::Serialization(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::Serialization(e.to_string()))
    }

    /// Size of the JSON form in bytes.
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}

fn set_or_remove(map: &mut BTreeMap<String, Value>, key: &str, value: &Value) {
    if value.is_null() {
        map.remove(key);
    } else {
        map.insert(key.to_string(), value.clone());
    }
}
