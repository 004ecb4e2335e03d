//! Durable draft storage.

pub mod rocks;

pub use rocks::{DraftMetadata, DraftStoreConfig, RocksDraftStore, StoreError};
