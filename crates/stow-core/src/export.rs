//! # JSON Export
//!
//! Renders records back to JSON through the same mapping tables the import
//! reads, so an exported document re-imports to the same records.
//!
//! - Scalars use their JSON key; fields never set are omitted.
//! - Object relationships render as nested objects or `null`.
//! - List relationships render as arrays in stored order.
//! - The primary key is always emitted.
//!
//! A record reached again while it is still being rendered (a reference
//! cycle) is cut to its bare primary key object, or `null` for keyless
//! types.

use crate::mapper::JsonObject;
use crate::primitives::MAX_NESTING_DEPTH;
use crate::schema::FieldKind;
use crate::session::Session;
use crate::{Link, Record, RecordId, StowError};
use serde_json::Value;

/// Export one record as a JSON object.
pub fn record_to_json(session: &Session, id: RecordId) -> Result<Value, StowError> {
    let record = session.get(id)?.ok_or(StowError::RecordNotFound(id))?;
    let mut path = Vec::new();
    render(session, &record, &mut path)
}

/// Export every record of a type as a JSON array, in id order.
pub fn type_to_json(session: &Session, record_type: &str) -> Result<Value, StowError> {
    let mut items = Vec::new();
    for record in session.objects(record_type)? {
        let mut path = Vec::new();
        items.push(render(session, &record, &mut path)?);
    }
    Ok(Value::Array(items))
}

/// Bare primary-key object of a record, `null` for keyless types.
fn stub(session: &Session, record: &Record) -> Result<Value, StowError> {
    let record_type = session.schema().get(&record.record_type)?;
    match (record_type.key_mapping(), &record.key) {
        (Some(mapping), Some(key)) => {
            let mut object = JsonObject::new();
            object.insert(mapping.key().to_string(), key.to_json());
            Ok(Value::Object(object))
        }
        _ => Ok(Value::Null),
    }
}

fn render(session: &Session, record: &Record, path: &mut Vec<RecordId>) -> Result<Value, StowError> {
    if path.contains(&record.id) || path.len() > MAX_NESTING_DEPTH {
        return stub(session, record);
    }
    path.push(record.id);

    let record_type = session.schema().get(&record.record_type)?;
    let mut object = JsonObject::new();
    for mapping in &record_type.fields {
        let key = mapping.key().to_string();
        if record_type.primary_key.as_deref() == Some(mapping.name.as_str()) {
            if let Some(value) = &record.key {
                object.insert(key, value.to_json());
            }
            continue;
        }

        match (&mapping.kind, record.links.get(&mapping.name)) {
            (FieldKind::Object { .. }, Some(Link::One(target))) => {
                let value = match target {
                    Some(id) => linked(session, *id, path)?,
                    None => Value::Null,
                };
                object.insert(key, value);
            }
            (FieldKind::List { .. }, Some(Link::Many(targets))) => {
                let mut items = Vec::with_capacity(targets.len());
                for id in targets {
                    items.push(linked(session, *id, path)?);
                }
                object.insert(key, Value::Array(items));
            }
            (kind, _) if kind.is_scalar() => {
                if let Some(value) = record.field(&mapping.name) {
                    object.insert(key, value.to_json());
                }
            }
            _ => {}
        }
    }

    path.pop();
    Ok(Value::Object(object))
}

fn linked(session: &Session, id: RecordId, path: &mut Vec<RecordId>) -> Result<Value, StowError> {
    match session.get(id)? {
        Some(record) => render(session, &record, path),
        None => Ok(Value::Null),
    }
}

// =============================================================================
// TESTS
// =============================================================================
