//! # stow-core
//!
//! Primary-key upsert of nested JSON documents into a typed record store.
//!
//! Given a JSON document and a declared mapping table per record type, the
//! upsert engine decides for every node of the document whether to create a
//! record, reuse the one with the same primary key, or update it in place.
//! Deleting records triggers a cascade sweep that removes dependents left
//! without inbound references.
//!
//! ## Layers
//!
//! - `schema` / `mapper`: declarative mapping tables and tri-state field reads
//! - `upsert`: the resolution and merge algorithm
//! - `cascade`: post-delete orphan cleanup
//! - `session`: write scopes, the process-wide write lock, notifications
//! - `storage`: the `RecordStore` contract and its memory/redb backends
//!
//! The crate is synchronous and has no network dependencies.

// =============================================================================
// MODULES
// =============================================================================

pub mod cascade;
pub mod export;
pub mod formats;
pub mod mapper;
pub mod notify;
pub mod primitives;
pub mod schema;
pub mod session;
pub mod storage;
pub mod types;
pub mod upsert;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    FieldValue, KeyValue, Link, Record, RecordData, RecordId, StorePhase, StowError,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use cascade::{Cascade, CleanupReport};
pub use export::{record_to_json, type_to_json};
pub use mapper::{JsonObject, Patch};
pub use notify::{ChangeSet, NotificationToken, TypeChanges};
pub use schema::{FieldKind, FieldMapping, InboundRef, RecordType, Schema, SweepPolicy};
pub use session::{Session, StorageBackend, clear_error_handler, set_error_handler};
pub use storage::{MemoryStore, RecordStore, RedbStore};
pub use upsert::Upserter;

// =============================================================================
// RE-EXPORTS: Formats
// =============================================================================

#[cfg(feature = "crypto-hash")]
pub use formats::snapshot_digest;
pub use formats::{SnapshotHeader, snapshot_from_bytes, snapshot_to_bytes};
