//! RocksDB-backed draft store.
//!
//! Column families:
//! - `drafts`:   latest draft per token (JSON, LZ4 compressed)
//! - `history`:  exported version history per token (JSON, LZ4 compressed)
//! - `metadata`: bincode [`DraftMetadata`] per token
//!
//! Keys are the UTF-8 bytes of the token id. A draft and its metadata are
//! always written in one batch.

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use lander_core::DocumentState;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{lz4_compress, lz4_decompress};
use crate::gateway::{GatewayError, PersistenceGateway};
use crate::version_manager::HistoryExport;

const CF_DRAFTS: &str = "drafts";
const CF_HISTORY: &str = "history";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DRAFTS, CF_HISTORY, CF_METADATA];

#[derive(Debug, Clone)]
pub struct DraftStoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for DraftStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lander_drafts"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl DraftStoreConfig {
    /// Config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 2 * 1024 * 1024,
        }
    }
}

/// Bookkeeping stored beside each draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftMetadata {
    pub token_id: String,
    /// Number of times the draft has been saved.
    pub version: u64,
    /// Uncompressed draft size in bytes
    pub draft_size: u64,
    pub compressed_size: u64,
    /// Compressed history size in bytes, 0 if none stored.
    pub history_size: u64,
    /// `last_updated` of the first saved draft (ms)
    pub created_at: u64,
    /// `last_updated` of the latest saved draft (ms)
    pub updated_at: u64,
}

impl DraftMetadata {
    fn new(token_id: &str, now: u64) -> Self {
        Self {
            token_id: token_id.to_string(),
            version: 0,
            draft_size: 0,
            compressed_size: 0,
            history_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        GatewayError::Storage(e.to_string())
    }
}

/// Durable [`PersistenceGateway`]. Calls run synchronously on the
/// calling task; RocksDB point operations are short.
pub struct RocksDraftStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: DraftStoreConfig,
}

impl RocksDraftStore {
    /// Open (or create) the store and its column families.
    pub fn open(config: DraftStoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Draft store opened at {}", config.path.display());

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &DraftStoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Values are already LZ4 compressed.
            CF_DRAFTS | CF_HISTORY => {
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(2);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }
        opts
    }

    // ─── Drafts ───────────────────────────────────────────────────────

    /// Store the latest draft for its token and bump the metadata version.
    pub fn put_draft(&self, token_id: &str, state: &DocumentState) -> Result<DraftMetadata, StoreError> {
        let cf_drafts = self.cf(CF_DRAFTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let json = serde_json::to_vec(state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let compressed = lz4_compress(&json);

        let mut meta = self
            .load_metadata(token_id)?
            .unwrap_or_else(|| DraftMetadata::new(token_id, state.last_updated));
        meta.version += 1;
        meta.draft_size = json.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = state.last_updated;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_drafts, token_id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, token_id.as_bytes(), meta.encode()?);
        self.write(batch)?;

        log::debug!(
            "Draft {token_id} v{} stored ({} → {} bytes)",
            meta.version,
            meta.draft_size,
            meta.compressed_size
        );
        Ok(meta)
    }

    pub fn get_draft(&self, token_id: &str) -> Result<Option<DocumentState>, StoreError> {
        let cf = self.cf(CF_DRAFTS)?;
        match self.db.get_cf(&cf, token_id.as_bytes())? {
            Some(compressed) => {
                let json = lz4_decompress(&compressed)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                let state = serde_json::from_slice(&json)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    // ─── History ──────────────────────────────────────────────────────

    pub fn put_history(&self, token_id: &str, history: &HistoryExport) -> Result<(), StoreError> {
        let cf_history = self.cf(CF_HISTORY)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let json =
            serde_json::to_vec(history).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let compressed = lz4_compress(&json);

        let mut meta = self
            .load_metadata(token_id)?
            .unwrap_or_else(|| DraftMetadata::new(token_id, history.exported_at));
        meta.history_size = compressed.len() as u64;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_history, token_id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, token_id.as_bytes(), meta.encode()?);
        self.write(batch)?;

        log::debug!(
            "History for {token_id} stored ({} snapshots, {} bytes)",
            history.snapshots.len(),
            compressed.len()
        );
        Ok(())
    }

    pub fn get_history(&self, token_id: &str) -> Result<Option<HistoryExport>, StoreError> {
        let cf = self.cf(CF_HISTORY)?;
        match self.db.get_cf(&cf, token_id.as_bytes())? {
            Some(compressed) => {
                let json = lz4_decompress(&compressed)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                let history = serde_json::from_slice(&json)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(history))
            }
            None => Ok(None),
        }
    }

    // ─── Metadata ─────────────────────────────────────────────────────

    pub fn load_metadata(&self, token_id: &str) -> Result<Option<DraftMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        self.db
            .get_cf(&cf, token_id.as_bytes())?
            .map(|bytes| DraftMetadata::decode(&bytes))
            .transpose()
    }

    /// Token ids with stored metadata, in key order.
    pub fn list_drafts(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut tokens = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let token = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Remove the draft, its history and metadata.
    pub fn delete_draft(&self, token_id: &str) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        for name in COLUMN_FAMILIES {
            batch.delete_cf(&self.cf(name)?, token_id.as_bytes());
        }
        self.write(batch)?;
        log::info!("Draft {token_id} deleted");
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl PersistenceGateway for RocksDraftStore {
    fn load_draft<'a>(
        &'a self,
        token_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<DocumentState>, GatewayError>> {
        Box::pin(async move { self.get_draft(token_id).map_err(GatewayError::from) })
    }

    fn save_draft<'a>(
        &'a self,
        token_id: &'a str,
        state: &'a DocumentState,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            self.put_draft(token_id, state)
                .map(|_| ())
                .map_err(GatewayError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open(dir: &tempfile::TempDir) -> RocksDraftStore {
        RocksDraftStore::open(DraftStoreConfig::for_testing(dir.path())).unwrap()
    }

    fn doc(token: &str, updated: u64) -> DocumentState {
        let mut d = DocumentState::new(token)
            .with_section("hero", [("headline", json!("Ship faster"))]);
        d.last_updated = updated;
        d
    }

    #[test]
    fn test_draft_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        let meta = store.put_draft("tok", &doc("tok", 10)).unwrap();
        assert_eq!(meta.version, 1);
        assert!(meta.compressed_size > 0);

        assert_eq!(store.get_draft("tok").unwrap(), Some(doc("tok", 10)));
        assert_eq!(store.get_draft("missing").unwrap(), None);
    }

    #[test]
    fn test_metadata_tracks_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);

        store.put_draft("tok", &doc("tok", 10)).unwrap();
        store.put_draft("tok", &doc("tok", 25)).unwrap();

        let meta = store.load_metadata("tok").unwrap().unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(meta.created_at, 10);
        assert_eq!(meta.updated_at, 25);
        assert!(store.load_metadata("other").unwrap().is_none());
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        store.put_draft("a", &doc("a", 1)).unwrap();
        store.put_draft("b", &doc("b", 1)).unwrap();
        assert_eq!(store.list_drafts().unwrap(), vec!["a", "b"]);

        store.delete_draft("a").unwrap();
        assert_eq!(store.list_drafts().unwrap(), vec!["b"]);
        assert!(store.get_draft("a").unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_drafts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(&dir);
            store.put_draft("tok", &doc("tok", 42)).unwrap();
            store.sync().unwrap();
        }
        let store = open(&dir);
        assert_eq!(store.get_draft("tok").unwrap().map(|d| d.last_updated), Some(42));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Compression("bad block".into());
        assert_eq!(err.to_string(), "Compression error: bad block");
        let gateway: GatewayError = err.into();
        assert!(matches!(gateway, GatewayError::Storage(_)));
    }
}
