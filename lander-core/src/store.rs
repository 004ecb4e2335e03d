use crate::change::ChangeEvent;
use crate::document::{DocumentState, ValidationError};

/// The live document container the editor renders from.
///
/// The versioning engine only ever reads it through [`export`](Self::export)
/// and replaces it wholesale through [`load_from_draft`](Self::load_from_draft);
/// field-level edits go through [`apply_change`](Self::apply_change).
pub trait DocumentStore: Send {
    fn export(&self) -> DocumentState;

    fn load_from_draft(&mut self, state: DocumentState);

    fn apply_change(&mut self, change: &ChangeEvent) -> Result<(), ValidationError>;
}

/// Plain in-memory store. `revision` counts every mutation so hosts can
/// cheaply tell whether a re-render is needed.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: DocumentState,
    revision: u64,
}

impl MemoryDocumentStore {
    pub fn new(state: DocumentState) -> Self {
        Self { state, revision: 0 }
    }

    pub fn state(&self) -> &DocumentState {
        &self.state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn export(&self) -> DocumentState {
        self.state.clone()
    }

    fn load_from_draft(&mut self, state: DocumentState) {
        self.state = state;
        self.revision += 1;
        log::debug!(
            "Document {} replaced wholesale (revision {})",
            self.state.token_id,
            self.revision
        );
    }

    fn apply_change(&mut self, change: &ChangeEvent) -> Result<(), ValidationError> {
        self.state.apply_change(change)?;
        self.revision += 1;
        Ok(())
    }
}
