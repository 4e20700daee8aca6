//! Record compaction and payload compression for stored shards and chunks.
//!
//! Records are first projected to [`CompactVectorRecord`] (short field names,
//! vectors rounded to four decimals), serialized as JSON, compressed and
//! finally base64 encoded so the payload fits a string key/value store.
//! Every payload starts with the algorithm tag (`lz4:`, `gz:`, `raw:`), so a
//! store written with one algorithm stays readable after the setting changes.

use std::io::{Read, Write};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lz4::{Decoder, EncoderBuilder};
use sha2::{Digest, Sha256};

use super::types::{CompactVectorRecord, CompressionAlgorithm, VectorRecord, VECTOR_PRECISION_DIGITS};
use crate::errors::{SearchError, SearchResult};

fn round_component(value: f32) -> f32 {
    let scale = 10f32.powi(VECTOR_PRECISION_DIGITS);
    (value * scale).round() / scale
}

/// Project records to their storage form
pub fn optimize_records(records: &[VectorRecord]) -> Vec<CompactVectorRecord> {
    records
        .iter()
        .map(|record| CompactVectorRecord {
            id: record.block_id.clone(),
            page: record.page_name.clone(),
            content: record.content.clone(),
            vector: record.vector.iter().copied().map(round_component).collect(),
            updated: record.last_updated,
        })
        .collect()
}

/// Rebuild full records from their storage form
pub fn restore_records(compact: Vec<CompactVectorRecord>) -> Vec<VectorRecord> {
    compact
        .into_iter()
        .map(|record| VectorRecord {
            block_id: record.id,
            page_name: record.page,
            content: record.content,
            vector: record.vector,
            last_updated: record.updated,
        })
        .collect()
}

fn compression_error(context: &str, error: impl std::fmt::Display) -> SearchError {
    SearchError::Compression {
        message: format!("{}: {}", context, error),
    }
}

/// Compress raw bytes with the given algorithm
pub fn compress_bytes(data: &[u8], algorithm: CompressionAlgorithm) -> SearchResult<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| compression_error("Gzip compression failed", e))?;
            encoder
                .finish()
                .map_err(|e| compression_error("Gzip compression failed", e))
        }
        CompressionAlgorithm::Lz4 => {
            let mut encoder = EncoderBuilder::new()
                .level(1) // Fast compression level
                .build(Vec::new())
                .map_err(|e| compression_error("LZ4 encoder creation failed", e))?;
            encoder
                .write_all(data)
                .map_err(|e| compression_error("LZ4 compression failed", e))?;
            let (compressed, result) = encoder.finish();
            result.map_err(|e| compression_error("LZ4 compression finalization failed", e))?;
            Ok(compressed)
        }
    }
}

/// Reverse [`compress_bytes`]
pub fn decompress_bytes(data: &[u8], algorithm: CompressionAlgorithm) -> SearchResult<Vec<u8>> {
    let mut decompressed = Vec::new();
    match algorithm {
        CompressionAlgorithm::None => return Ok(data.to_vec()),
        CompressionAlgorithm::Gzip => {
            GzDecoder::new(data)
                .read_to_end(&mut decompressed)
                .map_err(|e| compression_error("Gzip decompression failed", e))?;
        }
        CompressionAlgorithm::Lz4 => {
            let mut decoder =
                Decoder::new(data).map_err(|e| compression_error("LZ4 decoder creation failed", e))?;
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| compression_error("LZ4 decompression failed", e))?;
        }
    }
    Ok(decompressed)
}

/// Compress text into a tagged base64 payload
pub fn compress_text(text: &str, algorithm: CompressionAlgorithm) -> SearchResult<String> {
    let compressed = compress_bytes(text.as_bytes(), algorithm)?;
    Ok(format!("{}:{}", algorithm.payload_tag(), STANDARD.encode(compressed)))
}

/// Decode a payload produced by [`compress_text`]
pub fn decompress_text(payload: &str) -> SearchResult<String> {
    let (tag, body) = payload
        .split_once(':')
        .ok_or_else(|| compression_error("Malformed payload", "missing algorithm tag"))?;
    let algorithm = CompressionAlgorithm::from_payload_tag(tag)
        .ok_or_else(|| compression_error("Unknown payload algorithm", tag))?;
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| compression_error("Base64 decoding failed", e))?;
    let raw = decompress_bytes(&bytes, algorithm)?;
    String::from_utf8(raw).map_err(|e| compression_error("Payload is not UTF-8", e))
}

/// Compact, serialize and compress a batch of records
pub fn encode_records(records: &[VectorRecord], algorithm: CompressionAlgorithm) -> SearchResult<String> {
    let json = serde_json::to_string(&optimize_records(records))?;
    compress_text(&json, algorithm)
}

/// Reverse [`encode_records`]
pub fn decode_records(payload: &str) -> SearchResult<Vec<VectorRecord>> {
    let json = decompress_text(payload)?;
    let compact: Vec<CompactVectorRecord> = serde_json::from_str(&json)?;
    Ok(restore_records(compact))
}

/// SHA-256 hex digest of a stored payload
pub fn payload_checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
