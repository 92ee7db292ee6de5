//! # Formats
//!
//! On-disk representations that are not owned by a storage backend.

pub mod persistence;

#[cfg(feature = "crypto-hash")]
pub use persistence::snapshot_digest;
pub use persistence::{MAX_SNAPSHOT_SIZE, SnapshotHeader, snapshot_from_bytes, snapshot_to_bytes};
