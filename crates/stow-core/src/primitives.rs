//! # Primitives
//!
//! Hardcoded runtime constants for stow.

/// Magic bytes for the snapshot format header.
///
/// - File Header = Magic Bytes ("STOW") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"STOW";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum nesting depth the upsert engine follows into a JSON document.
///
/// Objects nested deeper than this are treated as malformed elements and
/// skipped, which bounds recursion for programmatically built documents
/// (serde_json's parser already stops at 128 levels).
pub const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of top-level elements accepted in a single batch import.
pub const MAX_BATCH_LENGTH: usize = 100_000;
