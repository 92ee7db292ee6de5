//! # redb-backed Record Storage
//!
//! A disk-backed record store using the redb embedded database.
//!
//! Records are staged in an in-memory [`MemoryStore`] for the duration of a
//! write transaction. On commit the net change set is flushed to redb in a
//! single ACID transaction, so a crash or a failed flush never leaves a
//! partially applied write scope on disk.

use super::{MemoryStore, RecordStore};
use crate::notify::ChangeSet;
use crate::{KeyValue, Record, RecordData, RecordId, StorePhase, StowError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for records: RecordId(u64) -> postcard-serialized Record
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_ID_KEY: &str = "next_record_id";

/// A disk-backed record store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
    /// Committed records plus the pending write scope.
    cache: MemoryStore,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("records", &self.cache.records().count())
            .field("next_id", &self.cache.next_id())
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a record database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StowError> {
        let init = |e: redb::Error| StowError::store(StorePhase::Init, e);
        let db = Database::create(path.as_ref()).map_err(|e| init(e.into()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(|e| init(e.into()))?;
            let _ = write_txn.open_table(RECORDS).map_err(|e| init(e.into()))?;
            let _ = write_txn.open_table(METADATA).map_err(|e| init(e.into()))?;
            write_txn.commit().map_err(|e| init(e.into()))?;
        }

        let read_txn = db.begin_read().map_err(|e| init(e.into()))?;

        let next_id = {
            let table = read_txn.open_table(METADATA).map_err(|e| init(e.into()))?;
            table
                .get(NEXT_ID_KEY)
                .map_err(|e| init(e.into()))?
                .map(|v| v.value())
                .unwrap_or(0)
        };

        let records = {
            let table = read_txn.open_table(RECORDS).map_err(|e| init(e.into()))?;
            let mut records = Vec::new();
            for entry in table.iter().map_err(|e| init(e.into()))? {
                let (_, bytes) = entry.map_err(|e| init(e.into()))?;
                let record: Record = postcard::from_bytes(bytes.value())
                    .map_err(|e| StowError::DeserializationError(e.to_string()))?;
                records.push(record);
            }
            records
        };

        let cache = MemoryStore::from_records(records, next_id)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            records = cache.records().count(),
            "opened record database"
        );
        Ok(Self { db, cache })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), StowError> {
        self.db
            .compact()
            .map_err(|e| StowError::store(StorePhase::Write, e))?;
        Ok(())
    }

    /// The staged in-memory view of the database.
    #[must_use]
    pub fn cache(&self) -> &MemoryStore {
        &self.cache
    }

    /// Write the pending change set to disk in one redb transaction.
    fn flush(&self, changes: &ChangeSet) -> Result<(), StowError> {
        let write = |e: redb::Error| StowError::store(StorePhase::Write, e);
        let write_txn = self.db.begin_write().map_err(|e| write(e.into()))?;
        {
            let mut records = write_txn.open_table(RECORDS).map_err(|e| write(e.into()))?;
            for id in changes.inserted.keys().chain(changes.modified.keys()) {
                let record = self
                    .cache
                    .record(*id)
                    .ok_or(StowError::RecordNotFound(*id))?;
                let bytes = postcard::to_allocvec(record)
                    .map_err(|e| StowError::SerializationError(e.to_string()))?;
                records
                    .insert(id.0, bytes.as_slice())
                    .map_err(|e| write(e.into()))?;
            }
            for id in changes.deleted.keys() {
                records.remove(id.0).map_err(|e| write(e.into()))?;
            }

            let mut meta = write_txn.open_table(METADATA).map_err(|e| write(e.into()))?;
            meta.insert(NEXT_ID_KEY, self.cache.next_id())
                .map_err(|e| write(e.into()))?;
        }
        write_txn.commit().map_err(|e| write(e.into()))?;
        Ok(())
    }
}

impl RecordStore for RedbStore {
    fn begin(&mut self) -> Result<(), StowError> {
        self.cache.begin()
    }

    fn commit(&mut self) -> Result<ChangeSet, StowError> {
        let changes = self
            .cache
            .pending()
            .cloned()
            .ok_or(StowError::NotInTransaction)?;

        // Update in-memory state only after the disk commit succeeded
        if let Err(err) = self.flush(&changes) {
            if let Err(rollback) = self.cache.rollback() {
                tracing::warn!(error = %rollback, cause = %err, "rollback of staged writes failed");
            }
            return Err(err);
        }
        self.cache.commit()
    }

    fn rollback(&mut self) -> Result<(), StowError> {
        self.cache.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.cache.in_transaction()
    }

    fn get(&self, id: RecordId) -> Result<Option<Record>, StowError> {
        self.cache.get(id)
    }

    fn find_by_key(
        &self,
        record_type: &str,
        key: &KeyValue,
    ) -> Result<Option<RecordId>, StowError> {
        self.cache.find_by_key(record_type, key)
    }

    fn insert(&mut self, data: RecordData, upsert_if_keyed: bool) -> Result<RecordId, StowError> {
        self.cache.insert(data, upsert_if_keyed)
    }

    fn put(&mut self, record: Record) -> Result<(), StowError> {
        self.cache.put(record)
    }

    fn remove(&mut self, id: RecordId) -> Result<Option<Record>, StowError> {
        self.cache.remove(id)
    }

    fn ids_of_type(&self, record_type: &str) -> Result<Vec<RecordId>, StowError> {
        self.cache.ids_of_type(record_type)
    }

    fn all_ids(&self) -> Result<Vec<RecordId>, StowError> {
        self.cache.all_ids()
    }

    fn len(&self) -> Result<usize, StowError> {
        self.cache.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
