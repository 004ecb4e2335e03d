//! # lander-core: Page draft model for the Lander editor
//!
//! Shared types for everything that reads or writes a landing-page draft:
//!
//! - [`DocumentState`]: the whole draft (layout, content, theme, meta)
//! - [`ChangeEvent`]: one immutable, atomic edit
//! - [`path`]: dotted field paths (`content.hero.headline`) over the
//!   JSON form of a draft
//! - [`DocumentStore`]: the live document container the editor mutates
//!
//! ```text
//! editor ──ChangeEvent──► DocumentStore ──export()──► DocumentState
//!                              ▲                          │
//!                              └──── load_from_draft() ◄──┘
//! ```

pub mod change;
pub mod document;
pub mod path;
pub mod store;

pub use change::{ChangeEvent, ChangeKind, ChangeSource};
pub use document::{DocumentState, PageLayout, ValidationError};
pub use store::{DocumentStore, MemoryDocumentStore};
