//! Snapshot compression.
//!
//! Snapshots are full documents, so history memory is dominated by them.
//! Older snapshots are stored through a [`SnapshotCodec`]; the default
//! [`Lz4JsonCodec`] serializes to JSON and applies LZ4 block compression
//! with the uncompressed size prepended.
//!
//! ```text
//! DocumentState ──serde_json──► bytes ──lz4──► CompressedSnapshot
//!       ▲                                            │
//!       └────────────── decode (all read paths) ◄────┘
//! ```

use lander_core::DocumentState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Snapshot serialization failed: {0}")]
    Serialization(String),
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
}

/// An encoded snapshot payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedSnapshot {
    /// Uncompressed size in bytes
    pub original_size: u32,
    pub compressed: Vec<u8>,
}

impl CompressedSnapshot {
    pub fn compress(data: &[u8]) -> Self {
        Self {
            original_size: data.len() as u32,
            compressed: lz4_compress(data),
        }
    }

    pub fn decompress(&self) -> Result<Vec<u8>, CodecError> {
        lz4_decompress(&self.compressed)
    }

    /// Original / compressed.
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed.is_empty() {
            return 0.0;
        }
        self.original_size as f64 / self.compressed.len() as f64
    }

    pub fn compressed_size(&self) -> usize {
        self.compressed.len()
    }
}

/// Encode/decode contract for stored snapshots. Implementations must be
/// lossless: `decode(encode(s)) == s`.
pub trait SnapshotCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, state: &DocumentState) -> Result<CompressedSnapshot, CodecError>;

    fn decode(&self, snapshot: &CompressedSnapshot) -> Result<DocumentState, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4JsonCodec;

impl SnapshotCodec for Lz4JsonCodec {
    fn name(&self) -> &'static str {
        "lz4-json"
    }

    fn encode(&self, state: &DocumentState) -> Result<CompressedSnapshot, CodecError> {
        let json =
            serde_json::to_vec(state).map_err(|e| CodecError::Serialization(e.to_string()))?;
        Ok(CompressedSnapshot::compress(&json))
    }

    fn decode(&self, snapshot: &CompressedSnapshot) -> Result<DocumentState, CodecError> {
        let json = snapshot.decompress()?;
        serde_json::from_slice(&json).map_err(|e| CodecError::Serialization(e.to_string()))
    }
}

/// Compress raw bytes with LZ4 (size-prepended block format).
pub fn lz4_compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

pub fn lz4_decompress(compressed: &[u8]) -> Result<Vec<u8>, CodecError> {
    lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| CodecError::DecompressionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn large_doc() -> DocumentState {
        let mut doc = DocumentState::new("tok");
        for i in 0..50 {
            doc = doc.with_section(
                &format!("section-{i}"),
                [
                    ("headline", json!("Ship landing pages in minutes, not weeks")),
                    ("subheadline", json!("The quick brown fox jumps over the lazy dog.")),
                ],
            );
        }
        doc
    }

    #[test]
    fn test_codec_is_lossless() {
        let codec = Lz4JsonCodec;
        let doc = large_doc();
        let encoded = codec.encode(&doc).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), doc);
    }

    #[test]
    fn test_repetitive_document_compresses() {
        let encoded = Lz4JsonCodec.encode(&large_doc()).unwrap();
        assert!(
            encoded.compression_ratio() > 2.0,
            "ratio {:.2}x too low for repetitive content",
            encoded.compression_ratio()
        );
        assert!(encoded.compressed_size() < encoded.original_size as usize);
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let mut encoded = Lz4JsonCodec.encode(&large_doc()).unwrap();
        encoded.compressed.truncate(8);
        assert!(Lz4JsonCodec.decode(&encoded).is_err());
    }

    #[test]
    fn test_empty_compress() {
        let snap = CompressedSnapshot::compress(&[]);
        assert_eq!(snap.original_size, 0);
        assert!(snap.decompress().unwrap().is_empty());
    }
}
