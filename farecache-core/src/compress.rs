//! Compact serialized form of cached collections
//!
//! Records are encoded with bincode and the buffer is zstd-compressed. A CRC
//! over the compressed payload catches corruption before decoding.
//!
//! Framed byte layout (little-endian):
//!
//! ```text
//! magic "FCZ1" | record_count u32 | raw_len u32 | checksum u32 | payload
//! ```

use crate::error::{CacheError, CacheResult};
use crate::record::{CachedCollection, Record};
use tracing::trace;

/// Magic bytes of a framed compressed record
pub const COMPRESSED_MAGIC: &[u8; 4] = b"FCZ1";

const HEADER_LEN: usize = 16;

/// Default zstd level; favours speed, entries are recompressed on every sweep
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Serialized, compressed collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedRecord {
    record_count: u32,
    raw_len: u32,
    checksum: u32,
    payload: Vec<u8>,
}

impl CompressedRecord {
    /// Number of records encoded
    pub fn record_count(&self) -> usize {
        self.record_count as usize
    }

    /// Size of the encoded records before compression
    pub fn raw_len(&self) -> usize {
        self.raw_len as usize
    }

    /// Size held in memory
    pub fn compressed_len(&self) -> usize {
        self.payload.len()
    }

    /// Framed byte form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(COMPRESSED_MAGIC);
        bytes.extend_from_slice(&self.record_count.to_le_bytes());
        bytes.extend_from_slice(&self.raw_len.to_le_bytes());
        bytes.extend_from_slice(&self.checksum.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse the framed byte form; the checksum is verified on decompression
    pub fn from_bytes(bytes: &[u8]) -> CacheResult<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != COMPRESSED_MAGIC {
            return Err(CacheError::Decompression(
                "invalid compressed record header".to_string(),
            ));
        }

        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        Ok(Self {
            record_count: word(4),
            raw_len: word(8),
            checksum: word(12),
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }
}

/// Converts between live collections and [`CompressedRecord`]s
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: i32,
}

impl Compressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    /// Encode and compress a collection
    pub fn compress<R: Record>(&self, collection: &CachedCollection<R>) -> CacheResult<CompressedRecord> {
        let records: Vec<&R> = collection.iter().map(|r| r.as_ref()).collect();

        let raw = bincode::serialize(&records)
            .map_err(|e| CacheError::Compression(e.to_string()))?;
        let payload = zstd::bulk::compress(&raw, self.level)
            .map_err(|e| CacheError::Compression(e.to_string()))?;

        let record_count = u32::try_from(records.len())
            .map_err(|_| CacheError::Compression("too many records".to_string()))?;
        let raw_len = u32::try_from(raw.len())
            .map_err(|_| CacheError::Compression("encoded collection too large".to_string()))?;

        trace!(
            records = records.len(),
            raw = raw.len(),
            compressed = payload.len(),
            "Compressed collection"
        );

        Ok(CompressedRecord {
            record_count,
            raw_len,
            checksum: crc32fast::hash(&payload),
            payload,
        })
    }

    /// Rebuild a collection value-equal to the one that was compressed
    pub fn uncompress<R: Record>(&self, record: &CompressedRecord) -> CacheResult<CachedCollection<R>> {
        let actual = crc32fast::hash(&record.payload);
        if actual != record.checksum {
            return Err(CacheError::Decompression(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                record.checksum, actual
            )));
        }

        let raw = zstd::bulk::decompress(&record.payload, record.raw_len())
            .map_err(|e| CacheError::Decompression(e.to_string()))?;
        let records: Vec<R> = bincode::deserialize(&raw)
            .map_err(|e| CacheError::Decompression(e.to_string()))?;

        if records.len() != record.record_count() {
            return Err(CacheError::Decompression(format!(
                "expected {} records, decoded {}",
                record.record_count,
                records.len()
            )));
        }

        Ok(CachedCollection::new(records))
    }

    /// Parse framed bytes and decompress them
    pub fn uncompress_bytes<R: Record>(&self, bytes: &[u8]) -> CacheResult<CachedCollection<R>> {
        self.uncompress(&CompressedRecord::from_bytes(bytes)?)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}
