//! # Snapshot Format
//!
//! Binary serialization of a committed record store, used by
//! `Session::write_copy` and `Session::open_copy`.
//!
//! Format: Header (5 bytes) + postcard-serialized snapshot.
//! - 4 bytes: Magic ("STOW")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is parsed.

use crate::primitives;
use crate::storage::MemoryStore;
use crate::{Record, StowError};
use serde::{Deserialize, Serialize};

/// Maximum allowed snapshot size.
///
/// Checked before deserialization so a corrupted file cannot force a huge
/// allocation.
pub const MAX_SNAPSHOT_SIZE: usize = 500 * 1024 * 1024; // 500 MB

const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header preceding every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), StowError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(StowError::DeserializationError(
                "invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(StowError::DeserializationError(format!(
                "unsupported snapshot version {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StowError> {
        let header = bytes
            .get(..HEADER_LEN)
            .ok_or_else(|| StowError::DeserializationError("header too short".to_string()))?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SNAPSHOT PAYLOAD
// =============================================================================

#[derive(Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    records: Vec<Record>,
}

/// Serialize the committed records of a store (header + payload).
///
/// Pure transformation, no file I/O. Fails if a write transaction is open,
/// since its staged records are not committed.
pub fn snapshot_to_bytes(store: &MemoryStore) -> Result<Vec<u8>, StowError> {
    if store.pending().is_some() {
        return Err(StowError::store(
            crate::StorePhase::Copy,
            "cannot snapshot inside a write transaction",
        ));
    }
    let snapshot = Snapshot {
        next_id: store.next_id(),
        records: store.records().cloned().collect(),
    };
    let payload = postcard::to_stdvec(&snapshot)
        .map_err(|e| StowError::SerializationError(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&SnapshotHeader::new().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Rebuild a store from snapshot bytes.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<MemoryStore, StowError> {
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(StowError::DeserializationError(format!(
            "snapshot of {} bytes exceeds maximum of {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }
    SnapshotHeader::from_bytes(bytes)?.validate()?;

    let snapshot: Snapshot = postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        StowError::DeserializationError(format!("failed to decode snapshot: {e}"))
    })?;
    MemoryStore::from_records(snapshot.records, snapshot.next_id)
}

/// BLAKE3 digest of snapshot bytes, hex encoded.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn snapshot_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

// =============================================================================
// TESTS
// =============================================================================
