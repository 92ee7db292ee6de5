//! # Upsert Engine
//!
//! Resolves a JSON document against a record type and decides, for every
//! node of the JSON tree, whether to create a record, reuse the record with
//! the same primary key, or update one in place.
//!
//! ## Resolution steps
//!
//! 1. `null` or a non-object yields `None`.
//! 2. Keyed types look up the primary key; a found record is updated in
//!    place, otherwise a draft with the key pre-set is built. Keyless types
//!    always build a draft.
//! 3. Scalar fields whose key is present are copied; `null` stores
//!    [`FieldValue::Null`].
//! 4. Object relationships: `null` clears, a nested object is upserted
//!    recursively and replaces the previous reference. A nested object
//!    skipped for its depth leaves the reference untouched.
//! 5. List relationships: `null` or `[]` clears, a non-empty array replaces
//!    the list with the upserted elements in array order.
//! 6. Drafts are inserted after population.
//!
//! Absent keys never touch the record. Only an unreadable primary key aborts
//! the whole operation; every other malformed element is skipped.

use crate::mapper::{self, JsonObject, Patch};
use crate::primitives::MAX_NESTING_DEPTH;
use crate::schema::{FieldKind, RecordType, Schema};
use crate::storage::RecordStore;
use crate::{FieldValue, Link, RecordData, RecordId, StowError};
use serde_json::Value;

/// Record being populated by one upsert call.
enum Target {
    /// A live record, mutated in place.
    Existing(RecordId),
    /// A record that is inserted once populated.
    Draft(RecordData),
}

impl Target {
    /// Apply a mutation to the target.
    ///
    /// Live records are re-read before every mutation so that writes made by
    /// nested upserts to the same record are not lost.
    fn update<S>(&mut self, store: &mut S, f: impl FnOnce(&mut RecordData)) -> Result<(), StowError>
    where
        S: RecordStore + ?Sized,
    {
        match self {
            Self::Draft(data) => {
                f(data);
                Ok(())
            }
            Self::Existing(id) => {
                let mut record = store.get(*id)?.ok_or(StowError::RecordNotFound(*id))?;
                let before = record.data.clone();
                f(&mut record.data);
                if record.data != before {
                    store.put(record)?;
                }
                Ok(())
            }
        }
    }
}

/// The upsert engine.
///
/// Stateless: every operation takes the store and schema explicitly and must
/// run inside an open write transaction.
pub struct Upserter;

impl Upserter {
    /// Upsert one JSON value as a record of `record_type`.
    ///
    /// Returns `Ok(None)` when the value is `null` or not a JSON object.
    pub fn upsert<S>(
        store: &mut S,
        schema: &Schema,
        record_type: &str,
        json: &Value,
    ) -> Result<Option<RecordId>, StowError>
    where
        S: RecordStore + ?Sized,
    {
        let record_type = schema.get(record_type)?;
        Self::upsert_value(store, schema, record_type, json, 0)
    }

    /// Upsert every element of a JSON array, skipping elements that resolve
    /// to nothing. Order is preserved.
    pub fn upsert_array<S>(
        store: &mut S,
        schema: &Schema,
        record_type: &str,
        items: &[Value],
    ) -> Result<Vec<RecordId>, StowError>
    where
        S: RecordStore + ?Sized,
    {
        let record_type = schema.get(record_type)?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            match Self::upsert_value(store, schema, record_type, item, 0)? {
                Some(id) => ids.push(id),
                None => tracing::warn!(
                    record_type = %record_type.name,
                    "skipping array element that is not a JSON object"
                ),
            }
        }
        Ok(ids)
    }

    fn upsert_value<S>(
        store: &mut S,
        schema: &Schema,
        record_type: &RecordType,
        json: &Value,
        depth: usize,
    ) -> Result<Option<RecordId>, StowError>
    where
        S: RecordStore + ?Sized,
    {
        match json {
            Value::Object(object) => Self::upsert_object(store, schema, record_type, object, depth),
            _ => Ok(None),
        }
    }

    fn upsert_object<S>(
        store: &mut S,
        schema: &Schema,
        record_type: &RecordType,
        json: &JsonObject,
        depth: usize,
    ) -> Result<Option<RecordId>, StowError>
    where
        S: RecordStore + ?Sized,
    {
        if depth > MAX_NESTING_DEPTH {
            tracing::warn!(
                record_type = %record_type.name,
                depth,
                "skipping document nested beyond the maximum depth"
            );
            return Ok(None);
        }

        let key = mapper::primary_key(record_type, json)?;
        let existing = match &key {
            Some(key) => store.find_by_key(&record_type.name, key)?,
            None => None,
        };
        let mut target = match existing {
            Some(id) => {
                tracing::debug!(record_type = %record_type.name, %id, "updating record");
                Target::Existing(id)
            }
            None => Target::Draft(RecordData::new(record_type.name.clone(), key.clone())),
        };

        // Scalars first, then relationships in declaration order.
        let pk = record_type.primary_key.as_deref();
        for mapping in record_type.fields.iter().filter(|m| m.kind.is_scalar()) {
            if Some(mapping.name.as_str()) == pk {
                continue;
            }
            let value = match mapper::scalar(mapping, json) {
                Patch::Unset => continue,
                Patch::Cleared => FieldValue::Null,
                Patch::Set(value) => value,
            };
            let name = mapping.name.clone();
            target.update(store, |data| {
                data.fields.insert(name, value);
            })?;
        }

        for mapping in &record_type.fields {
            let link = match &mapping.kind {
                FieldKind::Object { target: related } => match mapper::object(mapping, json) {
                    Patch::Unset => continue,
                    Patch::Cleared => Link::One(None),
                    Patch::Set(nested) => {
                        let related = schema.get(related)?;
                        match Self::upsert_object(store, schema, related, nested, depth + 1)? {
                            Some(id) => Link::One(Some(id)),
                            // Skipped documents leave the relationship as it was.
                            None => continue,
                        }
                    }
                },
                FieldKind::List { target: related } => match mapper::list(mapping, json) {
                    Patch::Unset => continue,
                    Patch::Cleared => Link::Many(Vec::new()),
                    Patch::Set(items) => {
                        let related = schema.get(related)?;
                        let mut ids = Vec::with_capacity(items.len());
                        for item in items {
                            if let Some(id) =
                                Self::upsert_object(store, schema, related, item, depth + 1)?
                            {
                                ids.push(id);
                            }
                        }
                        Link::Many(ids)
                    }
                },
                _ => continue,
            };
            let name = mapping.name.clone();
            target.update(store, |data| {
                data.links.insert(name, link);
            })?;
        }

        match target {
            Target::Existing(id) => Ok(Some(id)),
            Target::Draft(data) => {
                // A nested document may have created this key meanwhile.
                let id = store.insert(data, key.is_some())?;
                tracing::debug!(record_type = %record_type.name, %id, "inserted record");
                Ok(Some(id))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
