//! # Storage Backends
//!
//! The `RecordStore` trait is the contract the upsert and cascade engines
//! consume. Two backends implement it:
//! - [`MemoryStore`]: `BTreeMap`-backed, volatile unless snapshotted
//! - [`RedbStore`]: redb-backed, ACID, persistent
//!
//! All mutating primitives require an open transaction; calling them
//! outside one returns `StowError::NotInTransaction`.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::notify::ChangeSet;
use crate::schema::InboundRef;
use crate::{KeyValue, Record, RecordData, RecordId, StowError};
use std::collections::BTreeSet;

/// The RecordStore trait defines the storage primitives.
///
/// All fallible operations return `Result<T, StowError>` to support both
/// in-memory and persistent storage backends uniformly.
pub trait RecordStore {
    /// Begin a write transaction. Fails if one is already open.
    fn begin(&mut self) -> Result<(), StowError>;

    /// Commit the open transaction and return its net changes.
    fn commit(&mut self) -> Result<ChangeSet, StowError>;

    /// Discard every mutation since `begin`.
    fn rollback(&mut self) -> Result<(), StowError>;

    /// Whether a write transaction is open.
    fn in_transaction(&self) -> bool;

    /// Lookup a record by id. Returns an owned copy.
    fn get(&self, id: RecordId) -> Result<Option<Record>, StowError>;

    /// Point lookup by `(type, primary key)`.
    fn find_by_key(&self, record_type: &str, key: &KeyValue)
    -> Result<Option<RecordId>, StowError>;

    /// Insert a detached record and return its new id.
    ///
    /// If the record is keyed and a record with the same key exists:
    /// - with `upsert_if_keyed`, the draft's fields and links overwrite the
    ///   matching ones of the existing record, whose id is returned
    /// - otherwise the insert fails with a schema contract violation
    fn insert(&mut self, data: RecordData, upsert_if_keyed: bool) -> Result<RecordId, StowError>;

    /// Replace a live record's content. The type and key must not change.
    fn put(&mut self, record: Record) -> Result<(), StowError>;

    /// Remove a record without touching references to it.
    ///
    /// Prefer [`RecordStore::remove_all`], which also unlinks.
    fn remove(&mut self, id: RecordId) -> Result<Option<Record>, StowError>;

    /// Ids of every live record of a type, ascending.
    fn ids_of_type(&self, record_type: &str) -> Result<Vec<RecordId>, StowError>;

    /// Ids of every live record, ascending.
    fn all_ids(&self) -> Result<Vec<RecordId>, StowError>;

    /// Total number of live records.
    fn len(&self) -> Result<usize, StowError>;

    /// Whether the store holds no records.
    fn is_empty(&self) -> Result<bool, StowError> {
        Ok(self.len()? == 0)
    }

    /// Number of live records of a type.
    fn count(&self, record_type: &str) -> Result<usize, StowError> {
        Ok(self.ids_of_type(record_type)?.len())
    }

    /// Every live record of a type, in id order.
    fn records_of_type(&self, record_type: &str) -> Result<Vec<Record>, StowError> {
        let mut records = Vec::new();
        for id in self.ids_of_type(record_type)? {
            if let Some(record) = self.get(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Ids referenced by at least one live relationship.
    ///
    /// With `via`, only the listed `(type, field)` relationships count.
    fn referenced_ids(&self, via: Option<&[InboundRef]>) -> Result<BTreeSet<RecordId>, StowError> {
        let mut referenced = BTreeSet::new();
        for id in self.all_ids()? {
            let Some(record) = self.get(id)? else {
                continue;
            };
            for (field, target) in record.references() {
                let counts = via.is_none_or(|refs| {
                    refs.iter()
                        .any(|r| r.record_type == record.record_type && r.field == field)
                });
                if counts {
                    referenced.insert(target);
                }
            }
        }
        Ok(referenced)
    }

    /// Number of live relationships pointing at `target`.
    fn inbound_count(
        &self,
        target: RecordId,
        via: Option<&[InboundRef]>,
    ) -> Result<usize, StowError> {
        let mut count = 0usize;
        for id in self.all_ids()? {
            let Some(record) = self.get(id)? else {
                continue;
            };
            count += record
                .references()
                .filter(|(field, to)| {
                    *to == target
                        && via.is_none_or(|refs| {
                            refs.iter()
                                .any(|r| r.record_type == record.record_type && r.field == *field)
                        })
                })
                .count();
        }
        Ok(count)
    }

    /// Remove records and scrub every reference to them from survivors.
    ///
    /// Object relationships pointing at a removed record become empty;
    /// list relationships drop the entry. Returns the removed records.
    fn remove_all(&mut self, ids: &BTreeSet<RecordId>) -> Result<Vec<Record>, StowError> {
        if !self.in_transaction() {
            return Err(StowError::NotInTransaction);
        }
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.remove(*id)? {
                removed.push(record);
            }
        }
        if removed.is_empty() {
            return Ok(removed);
        }

        for id in self.all_ids()? {
            let Some(mut record) = self.get(id)? else {
                continue;
            };
            let mut changed = false;
            for link in record.links.values_mut() {
                for target in ids {
                    changed |= link.unlink(*target);
                }
            }
            if changed {
                self.put(record)?;
            }
        }
        Ok(removed)
    }
}
