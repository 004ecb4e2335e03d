//! # lander-autosave: Versioning & auto-save engine for Lander drafts
//!
//! Keeps a landing-page draft safe while it is edited:
//!
//! - [`tracker`]: records every edit, owns the dirty flag
//! - [`version_manager`]: full-document snapshots, undo/redo, bounded
//!   history, transparent compression ([`codec`]), export/import
//! - [`scheduler`]: debounce, periodic tick, backoff, save telemetry
//! - [`conflict`]: local vs remote divergence and its resolution
//! - [`gateway`] / [`storage`]: where drafts are persisted
//! - [`session`]: [`DraftSession`] wires it all together and runs the
//!   background [`AutoSaveTask`]
//!
//! ```text
//!   editor ──ChangeEvent──► DraftSession ──► DocumentStore (live doc)
//!                               │
//!            ┌──────────────────┼─────────────────────┐
//!            ▼                  ▼                     ▼
//!      ChangeTracker      VersionManager        SaveScheduler
//!      (queue, dirty)     (snapshots, conflicts) (when to save)
//!                                                     │
//!                                                     ▼
//!                                          PersistenceGateway
//! ```
//!
//! Time and connectivity come from an injected [`ClockAndConnectivity`].

pub mod clock;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod error;
pub mod gateway;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod tracker;
pub mod version_manager;

pub use clock::{ClockAndConnectivity, ManualClock, SystemClock};
pub use codec::{CodecError, CompressedSnapshot, Lz4JsonCodec, SnapshotCodec};
pub use config::{AutoSaveConfig, ConflictConfig, EngineConfig, VersionConfig};
pub use conflict::{
    ConflictField, ConflictResolution, ConflictResolver, ConflictType, ResolutionStrategy,
};
pub use error::{EngineError, EngineResult};
pub use gateway::{GatewayError, MemoryGateway, PersistenceGateway};
pub use scheduler::{AutoSaveState, PerformanceStats, SaveStatus, StatusColor};
pub use session::{AutoSaveTask, DraftSession, LoadOutcome};
pub use snapshot::{Snapshot, SnapshotOrigin, VersionHistory};
pub use storage::{DraftStoreConfig, RocksDraftStore};
pub use tracker::ChangeTracker;
pub use version_manager::{HistoryExport, HistorySummary, VersionManager};
