//! # In-Memory Record Store
//!
//! Deterministic, `BTreeMap`-backed implementation of [`RecordStore`].
//!
//! Transactions keep an undo log: the first mutation of a record inside a
//! transaction saves its prior value (or its absence), and `rollback`
//! replays the log, so opening a transaction costs nothing regardless of
//! store size. [`RedbStore`](super::RedbStore) flushes the transaction's
//! net [`ChangeSet`] to disk.

use super::RecordStore;
use crate::notify::ChangeSet;
use crate::{KeyValue, Record, RecordData, RecordId, StowError};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
struct State {
    /// Record storage: RecordId -> Record
    records: BTreeMap<RecordId, Record>,
    /// Primary-key index: (type, key) -> RecordId
    key_index: BTreeMap<(String, KeyValue), RecordId>,
    /// Type index: type -> ids
    type_index: BTreeMap<String, BTreeSet<RecordId>>,
    /// Next available RecordId
    next_id: u64,
}

impl State {
    fn index(&mut self, record: &Record) {
        if let Some(key) = &record.key {
            self.key_index
                .insert((record.record_type.clone(), key.clone()), record.id);
        }
        self.type_index
            .entry(record.record_type.clone())
            .or_default()
            .insert(record.id);
    }

    fn unindex(&mut self, record: &Record) {
        if let Some(key) = &record.key {
            self.key_index
                .remove(&(record.record_type.clone(), key.clone()));
        }
        if let Some(ids) = self.type_index.get_mut(&record.record_type) {
            ids.remove(&record.id);
            if ids.is_empty() {
                self.type_index.remove(&record.record_type);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Transaction {
    /// Committed value of every record touched so far, `None` if it did not exist.
    undo: BTreeMap<RecordId, Option<Record>>,
    next_id: u64,
    changes: ChangeSet,
}

/// The in-memory record store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: State,
    txn: Option<Transaction>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted records, reconstructing the indexes.
    ///
    /// Fails if two records share a `(type, key)` pair or if `next_id`
    /// would collide with an existing id.
    pub fn from_records(
        records: impl IntoIterator<Item = Record>,
        next_id: u64,
    ) -> Result<Self, StowError> {
        let mut state = State {
            next_id,
            ..State::default()
        };
        for record in records {
            if record.id.0 >= next_id {
                return Err(StowError::DeserializationError(format!(
                    "record {} is not below next id {}",
                    record.id, next_id
                )));
            }
            if let Some(key) = &record.key {
                if state
                    .key_index
                    .contains_key(&(record.record_type.clone(), key.clone()))
                {
                    return Err(StowError::DeserializationError(format!(
                        "duplicate primary key {} for {}",
                        key, record.record_type
                    )));
                }
            }
            state.index(&record);
            state.records.insert(record.id, record);
        }
        Ok(Self { state, txn: None })
    }

    /// All committed-or-pending records in id order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.state.records.values()
    }

    /// The id the next insert will receive.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.state.next_id
    }

    /// Net changes of the open transaction, if any.
    #[must_use]
    pub fn pending(&self) -> Option<&ChangeSet> {
        self.txn.as_ref().map(|t| &t.changes)
    }

    /// Borrow a live record without cloning.
    #[must_use]
    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.state.records.get(&id)
    }

    fn txn_mut(&mut self) -> Result<&mut Transaction, StowError> {
        self.txn.as_mut().ok_or(StowError::NotInTransaction)
    }

    /// Save the committed value of `id` unless this transaction already did.
    fn remember(&mut self, id: RecordId) -> Result<(), StowError> {
        let prior = self.state.records.get(&id).cloned();
        self.txn_mut()?.undo.entry(id).or_insert(prior);
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn begin(&mut self) -> Result<(), StowError> {
        if self.txn.is_some() {
            return Err(StowError::store(
                crate::StorePhase::Write,
                "transaction already open",
            ));
        }
        self.txn = Some(Transaction {
            undo: BTreeMap::new(),
            next_id: self.state.next_id,
            changes: ChangeSet::default(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<ChangeSet, StowError> {
        let txn = self.txn.take().ok_or(StowError::NotInTransaction)?;
        Ok(txn.changes)
    }

    fn rollback(&mut self) -> Result<(), StowError> {
        let txn = self.txn.take().ok_or(StowError::NotInTransaction)?;
        // Unindex every touched record before restoring any: a key freed and
        // reused inside the transaction belongs to two ids.
        for id in txn.undo.keys() {
            if let Some(current) = self.state.records.remove(id) {
                self.state.unindex(&current);
            }
        }
        for record in txn.undo.into_values().flatten() {
            self.state.index(&record);
            self.state.records.insert(record.id, record);
        }
        self.state.next_id = txn.next_id;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn get(&self, id: RecordId) -> Result<Option<Record>, StowError> {
        Ok(self.state.records.get(&id).cloned())
    }

    fn find_by_key(
        &self,
        record_type: &str,
        key: &KeyValue,
    ) -> Result<Option<RecordId>, StowError> {
        Ok(self
            .state
            .key_index
            .get(&(record_type.to_string(), key.clone()))
            .copied())
    }

    fn insert(&mut self, data: RecordData, upsert_if_keyed: bool) -> Result<RecordId, StowError> {
        if self.txn.is_none() {
            return Err(StowError::NotInTransaction);
        }

        if let Some(key) = &data.key {
            if let Some(existing_id) = self.find_by_key(&data.record_type, key)? {
                if !upsert_if_keyed {
                    return Err(StowError::contract(
                        &data.record_type,
                        format!("duplicate primary key {key}"),
                    ));
                }
                let mut existing = self
                    .get(existing_id)?
                    .ok_or(StowError::RecordNotFound(existing_id))?;
                existing.fields.extend(data.fields);
                existing.links.extend(data.links);
                self.put(existing)?;
                return Ok(existing_id);
            }
        }

        let id = RecordId(self.state.next_id);
        self.remember(id)?;
        self.state.next_id = self.state.next_id.saturating_add(1);
        let record = Record::new(id, data);
        self.state.index(&record);
        let record_type = record.record_type.clone();
        self.state.records.insert(id, record);
        self.txn_mut()?.changes.record_insert(id, &record_type);
        Ok(id)
    }

    fn put(&mut self, record: Record) -> Result<(), StowError> {
        if self.txn.is_none() {
            return Err(StowError::NotInTransaction);
        }
        let current = self
            .state
            .records
            .get(&record.id)
            .ok_or(StowError::RecordNotFound(record.id))?;
        if current.record_type != record.record_type || current.key != record.key {
            return Err(StowError::contract(
                &current.record_type,
                format!("record {} cannot change its type or key", record.id),
            ));
        }
        let (id, record_type) = (record.id, record.record_type.clone());
        self.remember(id)?;
        self.state.records.insert(id, record);
        self.txn_mut()?.changes.record_modify(id, &record_type);
        Ok(())
    }

    fn remove(&mut self, id: RecordId) -> Result<Option<Record>, StowError> {
        if self.txn.is_none() {
            return Err(StowError::NotInTransaction);
        }
        let Some(record) = self.state.records.remove(&id) else {
            return Ok(None);
        };
        self.state.unindex(&record);
        let txn = self.txn_mut()?;
        txn.undo.entry(id).or_insert_with(|| Some(record.clone()));
        txn.changes.record_delete(id, &record.record_type);
        Ok(Some(record))
    }

    fn ids_of_type(&self, record_type: &str) -> Result<Vec<RecordId>, StowError> {
        Ok(self
            .state
            .type_index
            .get(record_type)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    fn all_ids(&self) -> Result<Vec<RecordId>, StowError> {
        Ok(self.state.records.keys().copied().collect())
    }

    fn len(&self) -> Result<usize, StowError> {
        Ok(self.state.records.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
