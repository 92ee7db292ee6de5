//! # Core Type Definitions
//!
//! This module contains the core types shared by every stow component:
//! - Record identifiers and primary-key values (`RecordId`, `KeyValue`)
//! - Field payloads (`FieldValue`, `Link`)
//! - Persisted records (`RecordData`, `Record`)
//! - Error types (`StowError`, `StorePhase`)
//!
//! ## Determinism Guarantees
//!
//! Record fields and relationships live in `BTreeMap`s so that iteration,
//! serialization and JSON export are ordered identically on every run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Internal identifier of a live record.
///
/// Assigned by the store on insert and never reused within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A primary-key value.
///
/// Only integer and text keys are supported; they are the two id shapes
/// that JSON documents carry unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl KeyValue {
    /// Render the key back to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Text(v) => serde_json::Value::from(v.as_str()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// =============================================================================
// FIELD PAYLOADS
// =============================================================================

/// Value of a scalar field.
///
/// `Null` is what an explicit JSON `null` leaves behind: the field is
/// present on the record but empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value back to JSON. Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(v) => serde_json::Value::String(v.clone()),
        }
    }
}

/// Value of a relationship field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// Object relationship: at most one referenced record.
    One(Option<RecordId>),
    /// List relationship: ordered references, duplicates allowed.
    Many(Vec<RecordId>),
}

impl Link {
    /// Every record id this link points at, in order.
    pub fn targets(&self) -> impl Iterator<Item = RecordId> + '_ {
        let (one, many): (Option<RecordId>, &[RecordId]) = match self {
            Self::One(target) => (*target, &[]),
            Self::Many(targets) => (None, targets.as_slice()),
        };
        one.into_iter().chain(many.iter().copied())
    }

    /// Drop every reference to `target`. Returns true if anything changed.
    pub fn unlink(&mut self, target: RecordId) -> bool {
        match self {
            Self::One(current) if *current == Some(target) => {
                *current = None;
                true
            }
            Self::One(_) => false,
            Self::Many(targets) => {
                let before = targets.len();
                targets.retain(|id| *id != target);
                targets.len() != before
            }
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// The content of a record, independent of whether it has been stored yet.
///
/// A `RecordData` that has not been inserted is the detached draft the
/// upsert engine populates before handing it to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    /// Name of the record type this record belongs to.
    pub record_type: String,
    /// Primary-key value, `None` for keyless types.
    pub key: Option<KeyValue>,
    /// Scalar fields by field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Relationship fields by field name.
    pub links: BTreeMap<String, Link>,
}

impl RecordData {
    /// Create an empty draft of the given type.
    #[must_use]
    pub fn new(record_type: impl Into<String>, key: Option<KeyValue>) -> Self {
        Self {
            record_type: record_type.into(),
            key,
            fields: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    /// Scalar field value, `None` when the field has never been set.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text field shortcut.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_str)
    }

    /// Integer field shortcut.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(FieldValue::as_i64)
    }

    /// Target of an object relationship.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<RecordId> {
        match self.links.get(name) {
            Some(Link::One(target)) => *target,
            _ => None,
        }
    }

    /// Targets of a list relationship (empty when unset).
    #[must_use]
    pub fn list(&self, name: &str) -> &[RecordId] {
        match self.links.get(name) {
            Some(Link::Many(targets)) => targets,
            _ => &[],
        }
    }

    /// All outgoing references as `(field, target)` pairs.
    pub fn references(&self) -> impl Iterator<Item = (&str, RecordId)> + '_ {
        self.links
            .iter()
            .flat_map(|(field, link)| link.targets().map(move |id| (field.as_str(), id)))
    }
}

/// A record that lives in a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub data: RecordData,
}

impl Record {
    #[must_use]
    pub fn new(id: RecordId, data: RecordData) -> Self {
        Self { id, data }
    }
}

impl Deref for Record {
    type Target = RecordData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Record {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Phase in which a storage-level failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorePhase {
    /// Opening or initialising the backend.
    Init,
    /// Beginning or committing a write transaction.
    Write,
    /// Writing a snapshot copy of the store.
    Copy,
}

impl fmt::Display for StorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Write => "write",
            Self::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in stow.
///
/// Per-element data problems never surface here: the upsert engine skips
/// those elements. Everything in this enum aborts the current write scope.
#[derive(Debug, Error)]
pub enum StowError {
    /// The data violates the declared mapping contract of a type.
    #[error("Schema contract violated for {record_type}: {reason}")]
    SchemaContract { record_type: String, reason: String },

    /// The schema declaration itself is inconsistent.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// The record type is not registered.
    #[error("Unknown record type: {0}")]
    UnknownType(String),

    /// The field is not declared on the record type.
    #[error("Unknown field {field} on {record_type}")]
    UnknownField { record_type: String, field: String },

    /// The record no longer exists (deleted or never inserted).
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// A mutating operation was attempted outside a write scope.
    #[error("Mutation requires an open write transaction")]
    NotInTransaction,

    /// The storage backend failed.
    #[error("Store error during {phase}: {message}")]
    Store { phase: StorePhase, message: String },

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl StowError {
    /// Build a storage error for the given phase.
    pub fn store(phase: StorePhase, err: impl fmt::Display) -> Self {
        Self::Store {
            phase,
            message: err.to_string(),
        }
    }

    /// Build a schema contract violation.
    pub fn contract(record_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaContract {
            record_type: record_type.into(),
            reason: reason.into(),
        }
    }

    /// Phase of a storage-level failure, `None` for every other error.
    #[must_use]
    pub fn phase(&self) -> Option<StorePhase> {
        match self {
            Self::Store { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
