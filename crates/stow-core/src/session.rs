//! # Session Module
//!
//! The record store facade: a schema, a storage backend and the write-scope
//! discipline around them.
//!
//! ## Write scopes
//!
//! Every mutation happens inside a write scope. Opening a scope takes a
//! process-wide write token, so concurrent sessions block instead of racing.
//! Closing it commits the backend transaction, then runs cascade cleanup for
//! every type that had records explicitly deleted, in its own nested
//! transaction, still under the same token. Observers are notified once the
//! token is released.
//!
//! A session holding an open scope blocks every other session of the
//! process that tries to open one, including sessions on the same thread.
//!
//! ## Storage Backends
//!
//! - `InMemory`: [`MemoryStore`] (fast, volatile unless copied)
//! - `Persistent`: [`RedbStore`] (disk-backed ACID storage)

use crate::cascade::{Cascade, CleanupReport};
use crate::formats::{snapshot_from_bytes, snapshot_to_bytes};
use crate::notify::{ChangeSet, NotificationToken, Observers};
use crate::schema::Schema;
use crate::storage::{MemoryStore, RecordStore, RedbStore};
use crate::upsert::Upserter;
use crate::{KeyValue, Record, RecordData, RecordId, StorePhase, StowError};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, RwLock};

// =============================================================================
// PROCESS-WIDE WRITE LOCK
// =============================================================================

struct WriteLock {
    held: Mutex<bool>,
    released: Condvar,
}

static WRITE_LOCK: WriteLock = WriteLock {
    held: Mutex::new(false),
    released: Condvar::new(),
};

/// Proof of holding the process-wide write lock. Released on drop.
#[derive(Debug)]
struct WriteToken(());

impl WriteToken {
    fn acquire() -> Self {
        let mut held = WRITE_LOCK
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *held {
            held = WRITE_LOCK
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *held = true;
        Self(())
    }
}

impl Drop for WriteToken {
    fn drop(&mut self) {
        let mut held = WRITE_LOCK
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *held = false;
        WRITE_LOCK.released.notify_one();
    }
}

// =============================================================================
// ERROR HANDLER HOOK
// =============================================================================

type ErrorHandler = Arc<dyn Fn(&StowError) + Send + Sync>;

static ERROR_HANDLER: RwLock<Option<ErrorHandler>> = RwLock::new(None);

/// Install a process-wide hook that sees every storage-level error before it
/// is returned to the caller.
pub fn set_error_handler(handler: impl Fn(&StowError) + Send + Sync + 'static) {
    let mut slot = ERROR_HANDLER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(Arc::new(handler));
}

/// Remove the hook installed by [`set_error_handler`].
pub fn clear_error_handler() {
    let mut slot = ERROR_HANDLER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = None;
}

/// Log a storage-level error and hand it to the hook.
fn report(err: StowError) -> StowError {
    if let Some(phase) = err.phase() {
        tracing::error!(%phase, error = %err, "store failure");
        let handler = ERROR_HANDLER
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(&err);
        }
    }
    err
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    fn store(&self) -> &dyn RecordStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }

    fn store_mut(&mut self) -> &mut dyn RecordStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store,
        }
    }

    /// Committed records as an in-memory view.
    fn committed(&self) -> &MemoryStore {
        match self {
            Self::InMemory(store) => store,
            Self::Persistent(store) => store.cache(),
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// State of an open write scope.
#[derive(Debug)]
struct Scope {
    _token: WriteToken,
    /// Types with explicitly deleted records, swept after commit.
    deleted: BTreeSet<String>,
}

/// The record store facade.
///
/// A session is owned by one execution context. Share it across threads
/// only behind external synchronization.
#[derive(Debug)]
pub struct Session {
    backend: StorageBackend,
    schema: Arc<Schema>,
    observers: Observers,
    scope: Option<Scope>,
}

impl Session {
    /// Create an empty in-memory session.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self::with_store(MemoryStore::new(), schema)
    }

    /// Create a session over an existing in-memory store.
    #[must_use]
    pub fn with_store(store: MemoryStore, schema: Schema) -> Self {
        Self {
            backend: StorageBackend::InMemory(store),
            schema: Arc::new(schema),
            observers: Observers::default(),
            scope: None,
        }
    }

    /// Create a session with persistent redb storage.
    ///
    /// Opens or creates a redb database at the given path.
    pub fn with_redb(path: impl AsRef<Path>, schema: Schema) -> Result<Self, StowError> {
        let store = RedbStore::open(path).map_err(report)?;
        Ok(Self {
            backend: StorageBackend::Persistent(store),
            schema: Arc::new(schema),
            observers: Observers::default(),
            scope: None,
        })
    }

    /// Load a snapshot written by [`Session::write_copy`] into memory.
    pub fn open_copy(path: impl AsRef<Path>, schema: Schema) -> Result<Self, StowError> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| report(StowError::store(StorePhase::Init, e)))?;
        let store = snapshot_from_bytes(&bytes)?;
        Ok(Self::with_store(store, schema))
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// Whether a write scope is open on this session.
    #[must_use]
    pub fn in_write(&self) -> bool {
        self.scope.is_some()
    }

    // =========================================================================
    // WRITE SCOPES
    // =========================================================================

    /// Run `body` inside a write scope.
    ///
    /// Commits when `body` returns `Ok`, rolls back when it returns `Err`.
    /// If a scope is already open, `body` runs inside it and the outer scope
    /// decides the outcome.
    pub fn write<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, StowError>,
    ) -> Result<T, StowError> {
        self.write_with_cleanup(body).map(|(value, _)| value)
    }

    /// [`Session::write`], also returning the cleanup report of the commit.
    ///
    /// The report is `None` when `body` joined an outer scope.
    pub fn write_with_cleanup<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, StowError>,
    ) -> Result<(T, Option<CleanupReport>), StowError> {
        if self.in_write() {
            return body(self).map(|value| (value, None));
        }
        self.begin_write()?;
        match body(self) {
            Ok(value) => {
                let cleanup = self.commit_write()?;
                Ok((value, cleanup))
            }
            Err(err) => {
                if let Err(rollback) = self.cancel_write() {
                    tracing::warn!(error = %rollback, "rollback after failed write scope failed");
                }
                Err(err)
            }
        }
    }

    /// Open a write scope. No-op if one is already open.
    pub fn begin_write(&mut self) -> Result<(), StowError> {
        if self.in_write() {
            return Ok(());
        }
        let token = WriteToken::acquire();
        self.backend.store_mut().begin().map_err(report)?;
        self.scope = Some(Scope {
            _token: token,
            deleted: BTreeSet::new(),
        });
        Ok(())
    }

    /// Commit the open write scope and run cascade cleanup.
    ///
    /// Returns the cleanup report, or `None` when no scope was open or no
    /// cleanup was needed. A failed cleanup is returned as an error, but the
    /// scope itself stays committed and its observers are still notified.
    pub fn commit_write(&mut self) -> Result<Option<CleanupReport>, StowError> {
        let Some(scope) = self.scope.take() else {
            return Ok(None);
        };
        Self::finish_write(
            self.backend.store_mut(),
            &self.schema,
            &self.observers,
            scope,
        )
    }

    fn finish_write(
        store: &mut dyn RecordStore,
        schema: &Schema,
        observers: &Observers,
        scope: Scope,
    ) -> Result<Option<CleanupReport>, StowError> {
        let changes = match store.commit() {
            Ok(changes) => changes,
            Err(err) => {
                if store.in_transaction() {
                    Self::rollback_after(store, &err);
                }
                return Err(report(err));
            }
        };

        let cleanup = if scope.deleted.is_empty() {
            None
        } else {
            Some(Self::cleanup(store, schema, &scope.deleted))
        };
        drop(scope);

        observers.notify(&changes);
        match cleanup {
            None => Ok(None),
            Some(Ok((summary, changes))) => {
                observers.notify(&changes);
                Ok(Some(summary))
            }
            Some(Err(err)) => Err(err),
        }
    }

    /// Nested cleanup transaction: commits in full or not at all.
    fn cleanup(
        store: &mut dyn RecordStore,
        schema: &Schema,
        deleted: &BTreeSet<String>,
    ) -> Result<(CleanupReport, ChangeSet), StowError> {
        store.begin().map_err(report)?;
        let swept = Cascade::sweep(store, schema, deleted).and_then(|cleanup| {
            let changes = store.commit()?;
            Ok((cleanup, changes))
        });
        match swept {
            Ok(result) => {
                tracing::debug!(removed = result.0.total(), "cascade cleanup committed");
                Ok(result)
            }
            Err(err) => {
                if store.in_transaction() {
                    Self::rollback_after(store, &err);
                }
                Err(report(err))
            }
        }
    }

    /// Roll back after `cause`; a failing rollback is logged, not returned.
    fn rollback_after(store: &mut dyn RecordStore, cause: &StowError) {
        if let Err(err) = store.rollback() {
            tracing::warn!(error = %err, cause = %cause, "rollback failed");
        }
    }

    /// Discard every mutation of the open write scope. No-op if none is open.
    pub fn cancel_write(&mut self) -> Result<(), StowError> {
        let Some(scope) = self.scope.take() else {
            return Ok(());
        };
        let result = self.backend.store_mut().rollback().map_err(report);
        drop(scope);
        result
    }

    // =========================================================================
    // MUTATIONS (inside a write scope)
    // =========================================================================

    fn require_write(&self) -> Result<(), StowError> {
        if self.in_write() {
            Ok(())
        } else {
            Err(StowError::NotInTransaction)
        }
    }

    /// Insert a detached record. Keyed records upsert on their key.
    pub fn add(&mut self, data: RecordData) -> Result<RecordId, StowError> {
        self.require_write()?;
        let record_type = self.schema.get(&data.record_type)?;
        match (&record_type.primary_key, &data.key) {
            (Some(pk), None) => {
                return Err(StowError::contract(
                    &record_type.name,
                    format!("record has no value for primary key {pk}"),
                ));
            }
            (None, Some(_)) => {
                return Err(StowError::contract(
                    &record_type.name,
                    "type has no primary key but the record carries one",
                ));
            }
            _ => {}
        }
        for name in data.fields.keys().chain(data.links.keys()) {
            if record_type.mapping(name).is_none() {
                return Err(StowError::UnknownField {
                    record_type: record_type.name.clone(),
                    field: name.clone(),
                });
            }
        }
        let keyed = data.key.is_some();
        self.backend.store_mut().insert(data, keyed)
    }

    /// Insert several detached records in order.
    pub fn add_all(
        &mut self,
        records: impl IntoIterator<Item = RecordData>,
    ) -> Result<Vec<RecordId>, StowError> {
        records.into_iter().map(|data| self.add(data)).collect()
    }

    /// Upsert one JSON object inside the open write scope.
    pub fn create(&mut self, record_type: &str, json: &Value) -> Result<Option<RecordId>, StowError> {
        self.require_write()?;
        Upserter::upsert(self.backend.store_mut(), &self.schema, record_type, json)
    }

    /// Upsert every element of a JSON array inside the open write scope.
    pub fn create_all(
        &mut self,
        record_type: &str,
        items: &[Value],
    ) -> Result<Vec<RecordId>, StowError> {
        self.require_write()?;
        Upserter::upsert_array(self.backend.store_mut(), &self.schema, record_type, items)
    }

    /// Import a JSON object or array of objects in its own write scope.
    ///
    /// Any other JSON value imports nothing.
    pub fn import(&mut self, record_type: &str, json: &Value) -> Result<Vec<RecordId>, StowError> {
        self.write(|session| match json {
            Value::Array(items) => session.create_all(record_type, items),
            other => Ok(session.create(record_type, other)?.into_iter().collect()),
        })
    }

    /// Delete one record and unlink every reference to it.
    pub fn delete(&mut self, id: RecordId) -> Result<(), StowError> {
        self.delete_all(&BTreeSet::from([id]))
    }

    /// Delete a set of records and unlink every reference to them.
    pub fn delete_all(&mut self, ids: &BTreeSet<RecordId>) -> Result<(), StowError> {
        self.require_write()?;
        for id in ids {
            if self.backend.store().get(*id)?.is_none() {
                return Err(StowError::RecordNotFound(*id));
            }
        }
        let removed = self.backend.store_mut().remove_all(ids)?;
        self.mark_deleted(removed.iter().map(|r| r.record_type.clone()));
        Ok(())
    }

    /// Delete every record of a type. Returns the number removed.
    pub fn delete_all_of(&mut self, record_type: &str) -> Result<usize, StowError> {
        self.delete_where(record_type, |_| true)
    }

    /// Delete every record of a type matching `predicate`.
    pub fn delete_where(
        &mut self,
        record_type: &str,
        predicate: impl Fn(&Record) -> bool,
    ) -> Result<usize, StowError> {
        self.require_write()?;
        let ids: BTreeSet<RecordId> = self
            .filter(record_type, predicate)?
            .into_iter()
            .map(|r| r.id)
            .collect();
        let removed = self.backend.store_mut().remove_all(&ids)?.len();
        if removed > 0 {
            self.mark_deleted([record_type.to_string()]);
        }
        Ok(removed)
    }

    /// Delete every record in the store. Does not trigger cleanup.
    pub fn delete_everything(&mut self) -> Result<usize, StowError> {
        self.require_write()?;
        let store = self.backend.store_mut();
        let ids: BTreeSet<RecordId> = store.all_ids()?.into_iter().collect();
        Ok(store.remove_all(&ids)?.len())
    }

    fn mark_deleted(&mut self, types: impl IntoIterator<Item = String>) {
        if let Some(scope) = self.scope.as_mut() {
            scope.deleted.extend(types);
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Lookup a record by id.
    pub fn get(&self, id: RecordId) -> Result<Option<Record>, StowError> {
        self.backend.store().get(id)
    }

    /// Lookup a record by primary key.
    pub fn find(&self, record_type: &str, key: &KeyValue) -> Result<Option<Record>, StowError> {
        self.schema.get(record_type)?;
        match self.backend.store().find_by_key(record_type, key)? {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    /// Every live record of a type, in id order.
    pub fn objects(&self, record_type: &str) -> Result<Vec<Record>, StowError> {
        self.schema.get(record_type)?;
        self.backend.store().records_of_type(record_type)
    }

    /// Live records of a type matching `predicate`.
    pub fn filter(
        &self,
        record_type: &str,
        predicate: impl Fn(&Record) -> bool,
    ) -> Result<Vec<Record>, StowError> {
        Ok(self
            .objects(record_type)?
            .into_iter()
            .filter(|r| predicate(r))
            .collect())
    }

    /// Number of live records of a type.
    pub fn count(&self, record_type: &str) -> Result<usize, StowError> {
        self.schema.get(record_type)?;
        self.backend.store().count(record_type)
    }

    /// Number of live relationships pointing at a record.
    pub fn inbound_count(&self, id: RecordId) -> Result<usize, StowError> {
        self.backend.store().inbound_count(id, None)
    }

    /// Total number of live records.
    pub fn len(&self) -> Result<usize, StowError> {
        self.backend.store().len()
    }

    pub fn is_empty(&self) -> Result<bool, StowError> {
        self.backend.store().is_empty()
    }

    // =========================================================================
    // NOTIFICATIONS & COPIES
    // =========================================================================

    /// Register a callback run after every committed write scope.
    #[must_use = "dropping the token unregisters the observer"]
    pub fn observe(
        &self,
        callback: impl FnMut(&ChangeSet) + Send + 'static,
    ) -> NotificationToken {
        self.observers.add(callback)
    }

    /// Serialize the committed state as snapshot bytes.
    pub fn snapshot(&self) -> Result<Vec<u8>, StowError> {
        if self.in_write() {
            return Err(report(StowError::store(
                StorePhase::Copy,
                "cannot copy inside a write scope",
            )));
        }
        snapshot_to_bytes(self.backend.committed()).map_err(report)
    }

    /// Write a snapshot copy of the committed state to `path`.
    pub fn write_copy(&self, path: impl AsRef<Path>) -> Result<(), StowError> {
        let bytes = self.snapshot()?;
        std::fs::write(path.as_ref(), bytes)
            .map_err(|e| report(StowError::store(StorePhase::Copy, e)))?;
        tracing::info!(path = %path.as_ref().display(), "wrote snapshot copy");
        Ok(())
    }

    /// Compact the redb file. No-op for in-memory sessions.
    pub fn compact(&mut self) -> Result<(), StowError> {
        match &mut self.backend {
            StorageBackend::InMemory(_) => Ok(()),
            StorageBackend::Persistent(store) => store.compact().map_err(report),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.cancel_write() {
            tracing::warn!(error = %err, "rollback of abandoned write scope failed");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::schema::{FieldMapping, RecordType};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn schema() -> Schema {
        Schema::new([
            RecordType::new("User")
                .primary_key("id")
                .field(FieldMapping::text("id"))
                .field(FieldMapping::list("dogs", "Dog"))
                .dependents(["Dog"]),
            RecordType::new("Dog")
                .primary_key("id")
                .field(FieldMapping::text("id"))
                .field(FieldMapping::text("color")),
        ])
        .unwrap()
    }

    #[test]
    fn failed_body_rolls_back() {
        let mut session = Session::new(schema());
        let result: Result<(), _> = session.write(|s| {
            s.create("Dog", &json!({"id": "1"}))?;
            Err(StowError::contract("Dog", "boom"))
        });
        assert!(result.is_err());
        assert!(!session.in_write());
        assert_eq!(session.count("Dog").unwrap(), 0);
    }

    #[test]
    fn nested_write_joins_outer_scope() {
        let mut session = Session::new(schema());
        session
            .write(|s| {
                s.write(|inner| inner.create("Dog", &json!({"id": "1"})))?;
                assert!(s.in_write());
                s.create("Dog", &json!({"id": "2"}))
            })
            .unwrap();
        assert_eq!(session.count("Dog").unwrap(), 2);
    }

    #[test]
    fn mutations_require_scope() {
        let mut session = Session::new(schema());
        let err = session.create("Dog", &json!({"id": "1"})).unwrap_err();
        assert!(matches!(err, StowError::NotInTransaction));
        assert!(session.commit_write().unwrap().is_none());
        session.cancel_write().unwrap();
    }

    #[test]
    fn add_validates_key_against_schema() {
        let mut session = Session::new(schema());
        session.begin_write().unwrap();
        let err = session.add(RecordData::new("Dog", None)).unwrap_err();
        assert!(matches!(err, StowError::SchemaContract { .. }));
        let mut bad = RecordData::new("Dog", Some(KeyValue::from("1")));
        bad.fields.insert("size".into(), crate::FieldValue::Int(3));
        assert!(matches!(
            session.add(bad).unwrap_err(),
            StowError::UnknownField { .. }
        ));
        let a = session
            .add(RecordData::new("Dog", Some(KeyValue::from("1"))))
            .unwrap();
        let b = session
            .add(RecordData::new("Dog", Some(KeyValue::from("1"))))
            .unwrap();
        assert_eq!(a, b);
        session.commit_write().unwrap();
    }

    #[test]
    fn delete_triggers_cleanup_after_commit() {
        let mut session = Session::new(schema());
        session
            .import("User", &json!({"id": "1", "dogs": [{"id": "a"}, {"id": "b"}]}))
            .unwrap();
        session
            .import("User", &json!({"id": "2", "dogs": [{"id": "b"}]}))
            .unwrap();

        session.begin_write().unwrap();
        let user = session.find("User", &KeyValue::from("1")).unwrap().unwrap();
        session.delete(user.id).unwrap();
        assert_eq!(session.count("Dog").unwrap(), 2);
        let report = session.commit_write().unwrap().unwrap();

        assert_eq!(report.total(), 1);
        assert_eq!(session.count("Dog").unwrap(), 1);
        assert!(session.find("Dog", &KeyValue::from("b")).unwrap().is_some());
    }

    #[test]
    fn write_with_cleanup_returns_report() {
        let mut session = Session::new(schema());
        session
            .import("User", &json!({"id": "1", "dogs": [{"id": "a"}]}))
            .unwrap();
        let (removed, report) = session
            .write_with_cleanup(|s| s.delete_all_of("User"))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(report.unwrap().removed.get("Dog"), Some(&1));
        assert_eq!(session.count("Dog").unwrap(), 0);
    }

    #[test]
    fn delete_everything_skips_cleanup() {
        let mut session = Session::new(schema());
        session
            .import("User", &json!({"id": "1", "dogs": [{"id": "a"}]}))
            .unwrap();
        session.begin_write().unwrap();
        assert_eq!(session.delete_everything().unwrap(), 2);
        assert!(session.commit_write().unwrap().is_none());
        assert!(session.is_empty().unwrap());
    }

    #[test]
    fn observers_see_commit_then_cleanup() {
        let mut session = Session::new(schema());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let token = session.observe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        session
            .import("User", &json!({"id": "1", "dogs": [{"id": "a"}]}))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        session
            .write(|s| s.delete_all_of("User").map(|_| ()))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        token.stop();
        session.import("Dog", &json!({"id": "z"})).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn copy_refused_inside_scope_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("copy.stow");
        let mut session = Session::new(schema());
        session.import("Dog", &json!([{"id": "1"}, {"id": "2"}])).unwrap();

        session.begin_write().unwrap();
        let err = session.write_copy(&path).unwrap_err();
        assert_eq!(err.phase(), Some(StorePhase::Copy));
        session.cancel_write().unwrap();

        session.write_copy(&path).unwrap();
        let copy = Session::open_copy(&path, schema()).unwrap();
        assert_eq!(copy.count("Dog").unwrap(), 2);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let session = Session::new(schema());
        assert!(matches!(
            session.objects("Cat").unwrap_err(),
            StowError::UnknownType(_)
        ));
    }

    // =========================================================================
    // WRITE LOCK & FAILURE PATHS
    // =========================================================================

    #[test]
    fn open_scope_blocks_writers_in_other_sessions() {
        let mut holder = Session::new(schema());
        holder.begin_write().unwrap();
        holder.create("Dog", &json!({"id": "1"})).unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let writer = std::thread::spawn(move || {
            let mut other = Session::new(schema());
            other.import("Dog", &json!({"id": "2"})).unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(150));
        assert!(!finished.load(Ordering::SeqCst));

        holder.commit_write().unwrap();
        writer.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    /// Memory store whose transaction primitives fail on demand.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        begins: usize,
        fail_begin_from: Option<usize>,
        fail_commit: bool,
        fail_rollback: bool,
    }

    impl RecordStore for FaultyStore {
        fn begin(&mut self) -> Result<(), StowError> {
            self.begins += 1;
            if self.fail_begin_from.is_some_and(|n| self.begins >= n) {
                return Err(StowError::store(StorePhase::Write, "begin refused"));
            }
            self.inner.begin()
        }

        fn commit(&mut self) -> Result<ChangeSet, StowError> {
            if self.fail_commit {
                return Err(StowError::store(StorePhase::Write, "disk full"));
            }
            self.inner.commit()
        }

        fn rollback(&mut self) -> Result<(), StowError> {
            if self.fail_rollback {
                return Err(StowError::store(StorePhase::Write, "rollback refused"));
            }
            self.inner.rollback()
        }

        fn in_transaction(&self) -> bool {
            self.inner.in_transaction()
        }

        fn get(&self, id: RecordId) -> Result<Option<Record>, StowError> {
            self.inner.get(id)
        }

        fn find_by_key(
            &self,
            record_type: &str,
            key: &KeyValue,
        ) -> Result<Option<RecordId>, StowError> {
            self.inner.find_by_key(record_type, key)
        }

        fn insert(&mut self, data: RecordData, upsert_if_keyed: bool) -> Result<RecordId, StowError> {
            self.inner.insert(data, upsert_if_keyed)
        }

        fn put(&mut self, record: Record) -> Result<(), StowError> {
            self.inner.put(record)
        }

        fn remove(&mut self, id: RecordId) -> Result<Option<Record>, StowError> {
            self.inner.remove(id)
        }

        fn ids_of_type(&self, record_type: &str) -> Result<Vec<RecordId>, StowError> {
            self.inner.ids_of_type(record_type)
        }

        fn all_ids(&self) -> Result<Vec<RecordId>, StowError> {
            self.inner.all_ids()
        }

        fn len(&self) -> Result<usize, StowError> {
            self.inner.len()
        }
    }

    #[test]
    fn failed_cleanup_still_notifies_committed_scope() {
        let mut session = Session::new(schema());
        session
            .import("User", &json!({"id": "1", "dogs": [{"id": "a"}]}))
            .unwrap();
        let StorageBackend::InMemory(populated) = session.backend() else {
            panic!("expected an in-memory backend");
        };
        let mut store = FaultyStore {
            inner: populated.clone(),
            fail_begin_from: Some(2),
            ..FaultyStore::default()
        };
        let user = store
            .find_by_key("User", &KeyValue::from("1"))
            .unwrap()
            .unwrap();
        store.begin().unwrap();
        store.remove_all(&BTreeSet::from([user])).unwrap();

        let observers = Observers::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _token = observers.add(move |changes| sink.lock().unwrap().push(changes.clone()));

        let scope = Scope {
            _token: WriteToken::acquire(),
            deleted: BTreeSet::from(["User".to_string()]),
        };
        let err = Session::finish_write(&mut store, &schema(), &observers, scope).unwrap_err();

        assert_eq!(err.phase(), Some(StorePhase::Write));
        let delivered = seen.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].for_type("User").deleted, vec![user]);
        assert_eq!(store.count("Dog").unwrap(), 1);
        assert!(!store.in_transaction());
    }

    #[test]
    fn failed_rollback_keeps_commit_error() {
        let mut store = FaultyStore {
            fail_commit: true,
            fail_rollback: true,
            ..FaultyStore::default()
        };
        store.begin().unwrap();
        store
            .insert(RecordData::new("Dog", Some(KeyValue::from("1"))), true)
            .unwrap();

        let scope = Scope {
            _token: WriteToken::acquire(),
            deleted: BTreeSet::new(),
        };
        let err = Session::finish_write(&mut store, &schema(), &Observers::default(), scope)
            .unwrap_err();

        assert_eq!(err.phase(), Some(StorePhase::Write));
        assert!(err.to_string().contains("disk full"));
    }
}
