//! # Field Mapper
//!
//! Reads declared fields out of a JSON object into tri-state patches.
//!
//! Every mapping site distinguishes three cases:
//! - key absent → [`Patch::Unset`], the field is left untouched
//! - key present with `null` → [`Patch::Cleared`]
//! - key present with a value → [`Patch::Set`]
//!
//! The upsert engine applies patches; it never looks at raw JSON keys.

use crate::schema::{FieldKind, FieldMapping, RecordType};
use crate::{FieldValue, KeyValue, StowError};
use serde_json::{Map, Value};

/// A JSON object as consumed by the mapper.
pub type JsonObject = Map<String, Value>;

/// Tri-state outcome of reading one mapped field.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    /// Key absent: leave the field alone.
    Unset,
    /// Key present with `null`: clear the field.
    Cleared,
    /// Key present with a usable value.
    Set(T),
}

impl<T> Patch<T> {
    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

/// Read the raw JSON value of a mapping.
pub fn read<'j>(mapping: &FieldMapping, json: &'j JsonObject) -> Patch<&'j Value> {
    match json.get(mapping.key()) {
        None => Patch::Unset,
        Some(Value::Null) => Patch::Cleared,
        Some(value) => Patch::Set(value),
    }
}

/// Read a scalar field.
///
/// A value of the wrong JSON type is a per-field data problem: the field is
/// reported as [`Patch::Unset`] so the existing value survives.
pub fn scalar(mapping: &FieldMapping, json: &JsonObject) -> Patch<FieldValue> {
    match read(mapping, json) {
        Patch::Unset => Patch::Unset,
        Patch::Cleared => Patch::Cleared,
        Patch::Set(value) => match convert(&mapping.kind, value) {
            Some(converted) => Patch::Set(converted),
            None => {
                tracing::debug!(
                    field = %mapping.name,
                    json_key = mapping.key(),
                    "ignoring value of unexpected JSON type"
                );
                Patch::Unset
            }
        },
    }
}

/// Read an object relationship.
///
/// Anything other than `null` or a JSON object leaves the relationship
/// untouched.
pub fn object<'j>(mapping: &FieldMapping, json: &'j JsonObject) -> Patch<&'j JsonObject> {
    match read(mapping, json) {
        Patch::Unset => Patch::Unset,
        Patch::Cleared => Patch::Cleared,
        Patch::Set(Value::Object(nested)) => Patch::Set(nested),
        Patch::Set(_) => {
            tracing::debug!(field = %mapping.name, "object relationship is not a JSON object");
            Patch::Unset
        }
    }
}

/// Read a list relationship.
///
/// `null`, an empty array and any non-array value all clear the list. The
/// returned elements keep array order; elements that are not objects are
/// dropped here.
pub fn list<'j>(mapping: &FieldMapping, json: &'j JsonObject) -> Patch<Vec<&'j JsonObject>> {
    match read(mapping, json) {
        Patch::Unset => Patch::Unset,
        Patch::Cleared => Patch::Cleared,
        Patch::Set(Value::Array(items)) if items.is_empty() => Patch::Cleared,
        Patch::Set(Value::Array(items)) => {
            let objects: Vec<&JsonObject> = items.iter().filter_map(Value::as_object).collect();
            if objects.len() != items.len() {
                tracing::warn!(
                    field = %mapping.name,
                    skipped = items.len() - objects.len(),
                    "skipping list elements that are not JSON objects"
                );
            }
            Patch::Set(objects)
        }
        Patch::Set(_) => {
            tracing::debug!(field = %mapping.name, "list relationship is not a JSON array");
            Patch::Cleared
        }
    }
}

/// Extract the primary key of `record_type` from a JSON object.
///
/// Returns `Ok(None)` for keyless types. For keyed types a missing, `null`
/// or mistyped key is a schema contract violation.
pub fn primary_key(
    record_type: &RecordType,
    json: &JsonObject,
) -> Result<Option<KeyValue>, StowError> {
    let Some(pk) = &record_type.primary_key else {
        return Ok(None);
    };
    let mapping = record_type.key_mapping().ok_or_else(|| {
        StowError::contract(&record_type.name, format!("primary key {pk} has no mapping"))
    })?;

    let value = match read(mapping, json) {
        Patch::Set(value) => value,
        Patch::Unset => {
            return Err(StowError::contract(
                &record_type.name,
                format!("primary key {:?} missing from document", mapping.key()),
            ));
        }
        Patch::Cleared => {
            return Err(StowError::contract(
                &record_type.name,
                format!("primary key {:?} is null", mapping.key()),
            ));
        }
    };

    let key = match (&mapping.kind, value) {
        (FieldKind::Int, Value::Number(n)) => n.as_i64().map(KeyValue::Int),
        (FieldKind::Text, Value::String(s)) => Some(KeyValue::Text(s.clone())),
        _ => None,
    };
    key.map(Some).ok_or_else(|| {
        StowError::contract(
            &record_type.name,
            format!("primary key {:?} has unreadable value {value}", mapping.key()),
        )
    })
}

/// Convert a JSON scalar to the declared field kind.
fn convert(kind: &FieldKind, value: &Value) -> Option<FieldValue> {
    match (kind, value) {
        (FieldKind::Bool, Value::Bool(b)) => Some(FieldValue::Bool(*b)),
        (FieldKind::Int, Value::Number(n)) => n.as_i64().map(FieldValue::Int),
        (FieldKind::Float, Value::Number(n)) => n.as_f64().map(FieldValue::Float),
        (FieldKind::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================
