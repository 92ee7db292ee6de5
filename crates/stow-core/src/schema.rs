//! # Schema
//!
//! Declarative per-type mapping tables.
//!
//! A [`RecordType`] states which JSON keys populate which fields, which field
//! (if any) is the primary key, which fields are relationships to other
//! types, and which types may be orphaned when instances of this type are
//! deleted. Nothing here performs resolution; the upsert and cascade engines
//! consult these tables.
//!
//! Schemas deserialize with serde, so the app layer can load them from TOML:
//!
//! ```toml
//! [[types]]
//! name = "User"
//! primary_key = "id"
//! dependents = ["Address", "Dog"]
//! fields = [
//!     { name = "id", kind = "text" },
//!     { name = "address", kind = "object", target = "Address" },
//!     { name = "dogs", kind = "list", target = "Dog" },
//! ]
//! ```

use crate::{KeyValue, StowError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// FIELD MAPPINGS
// =============================================================================

/// Kind of a mapped field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    /// Reference to at most one record of `target`.
    Object { target: String },
    /// Ordered references to records of `target`.
    List { target: String },
}

impl FieldKind {
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Object { .. } | Self::List { .. })
    }

    /// Referenced type of a relationship field.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Object { target } | Self::List { target } => Some(target),
            _ => None,
        }
    }
}

/// Association between one JSON key and one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name on the record.
    pub name: String,
    /// JSON key read for this field; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_key: Option<String>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldMapping {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            json_key: None,
            kind,
        }
    }

    #[must_use]
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    #[must_use]
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int)
    }

    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    #[must_use]
    pub fn object(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Object {
                target: target.into(),
            },
        )
    }

    #[must_use]
    pub fn list(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::List {
                target: target.into(),
            },
        )
    }

    /// Read this field from a different JSON key.
    #[must_use]
    pub fn from_key(mut self, json_key: impl Into<String>) -> Self {
        self.json_key = Some(json_key.into());
        self
    }

    /// The JSON key this field is read from.
    #[must_use]
    pub fn key(&self) -> &str {
        self.json_key.as_deref().unwrap_or(&self.name)
    }
}

// =============================================================================
// CLEANUP DECLARATIONS
// =============================================================================

/// A `(type, field)` relationship that counts as an inbound reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InboundRef {
    #[serde(rename = "type")]
    pub record_type: String,
    pub field: String,
}

impl InboundRef {
    #[must_use]
    pub fn new(record_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            field: field.into(),
        }
    }
}

/// Which inbound references keep an instance alive during a cleanup sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SweepPolicy {
    /// Any relationship from any live record.
    #[default]
    AnyInbound,
    /// Only the listed relationships.
    Inbound(Vec<InboundRef>),
}

// =============================================================================
// RECORD TYPES
// =============================================================================

/// Mapping table of one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordType {
    pub name: String,
    /// Name of the primary-key field; keyless types are insert-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    /// Types that may be orphaned when instances of this type are deleted.
    #[serde(default)]
    pub dependents: Vec<String>,
    /// How this type is swept when it is reached as a dependent.
    #[serde(default)]
    pub sweep: SweepPolicy,
}

impl RecordType {
    /// Start declaring a keyless type with no fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: None,
            fields: Vec::new(),
            dependents: Vec::new(),
            sweep: SweepPolicy::AnyInbound,
        }
    }

    /// Designate the primary-key field. The field must also be declared.
    #[must_use]
    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    #[must_use]
    pub fn field(mut self, mapping: FieldMapping) -> Self {
        self.fields.push(mapping);
        self
    }

    #[must_use]
    pub fn dependents<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependents.extend(types.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn sweep(mut self, policy: SweepPolicy) -> Self {
        self.sweep = policy;
        self
    }

    /// Mapping of a field by name.
    #[must_use]
    pub fn mapping(&self, field: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|m| m.name == field)
    }

    /// Mapping of the primary-key field.
    #[must_use]
    pub fn key_mapping(&self) -> Option<&FieldMapping> {
        self.primary_key.as_deref().and_then(|pk| self.mapping(pk))
    }

    /// Parse a textual key (CLI argument, URL segment) as this type's key.
    pub fn parse_key(&self, raw: &str) -> Result<KeyValue, StowError> {
        let mapping = self.key_mapping().ok_or_else(|| {
            StowError::contract(&self.name, "type has no primary key".to_string())
        })?;
        match mapping.kind {
            FieldKind::Int => raw.parse::<i64>().map(KeyValue::Int).map_err(|_| {
                StowError::contract(&self.name, format!("key {raw:?} is not an integer"))
            }),
            _ => Ok(KeyValue::Text(raw.to_string())),
        }
    }

    fn validate(&self, known: &BTreeSet<&str>) -> Result<(), StowError> {
        let mut seen = BTreeSet::new();
        for mapping in &self.fields {
            if !seen.insert(mapping.name.as_str()) {
                return Err(StowError::InvalidSchema(format!(
                    "{}: duplicate field {}",
                    self.name, mapping.name
                )));
            }
            if let Some(target) = mapping.kind.target() {
                if !known.contains(target) {
                    return Err(StowError::InvalidSchema(format!(
                        "{}.{}: unknown target type {}",
                        self.name, mapping.name, target
                    )));
                }
            }
        }

        if let Some(pk) = &self.primary_key {
            let mapping = self.mapping(pk).ok_or_else(|| {
                StowError::InvalidSchema(format!(
                    "{}: primary key {} is not a declared field",
                    self.name, pk
                ))
            })?;
            if !matches!(mapping.kind, FieldKind::Int | FieldKind::Text) {
                return Err(StowError::InvalidSchema(format!(
                    "{}: primary key {} must be an int or text field",
                    self.name, pk
                )));
            }
        }

        for dependent in &self.dependents {
            if !known.contains(dependent.as_str()) {
                return Err(StowError::InvalidSchema(format!(
                    "{}: unknown dependent type {}",
                    self.name, dependent
                )));
            }
        }

        if let SweepPolicy::Inbound(refs) = &self.sweep {
            for inbound in refs {
                if !known.contains(inbound.record_type.as_str()) {
                    return Err(StowError::InvalidSchema(format!(
                        "{}: sweep refers to unknown type {}",
                        self.name, inbound.record_type
                    )));
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// SCHEMA REGISTRY
// =============================================================================

/// The set of record types known to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    types: BTreeMap<String, RecordType>,
}

impl Schema {
    /// Build a schema, validating every cross-type reference.
    pub fn new(types: impl IntoIterator<Item = RecordType>) -> Result<Self, StowError> {
        let mut map = BTreeMap::new();
        for record_type in types {
            let name = record_type.name.clone();
            if map.insert(name.clone(), record_type).is_some() {
                return Err(StowError::InvalidSchema(format!(
                    "type {name} declared twice"
                )));
            }
        }

        let known: BTreeSet<&str> = map.keys().map(String::as_str).collect();
        for record_type in map.values() {
            record_type.validate(&known)?;
        }

        // Inbound sweep refs must name relationship fields of their type.
        for record_type in map.values() {
            if let SweepPolicy::Inbound(refs) = &record_type.sweep {
                for inbound in refs {
                    let is_link = map
                        .get(&inbound.record_type)
                        .and_then(|t| t.mapping(&inbound.field))
                        .is_some_and(|m| m.kind.target() == Some(record_type.name.as_str()));
                    if !is_link {
                        return Err(StowError::InvalidSchema(format!(
                            "{}: {}.{} is not a relationship to {}",
                            record_type.name,
                            inbound.record_type,
                            inbound.field,
                            record_type.name
                        )));
                    }
                }
            }
        }

        Ok(Self { types: map })
    }

    /// Lookup a record type, failing for unregistered names.
    pub fn get(&self, name: &str) -> Result<&RecordType, StowError> {
        self.types
            .get(name)
            .ok_or_else(|| StowError::UnknownType(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// All record types in name order.
    pub fn types(&self) -> impl Iterator<Item = &RecordType> {
        self.types.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dog() -> RecordType {
        RecordType::new("Dog")
            .primary_key("id")
            .field(FieldMapping::text("id"))
            .field(FieldMapping::text("color"))
    }

    #[test]
    fn json_key_defaults_to_field_name() {
        let m = FieldMapping::text("name");
        assert_eq!(m.key(), "name");
        let m = FieldMapping::text("name").from_key("full_name");
        assert_eq!(m.key(), "full_name");
    }

    #[test]
    fn rejects_unknown_relationship_target() {
        let owner = RecordType::new("Owner").field(FieldMapping::list("dogs", "Dog"));
        let err = Schema::new([owner]).expect_err("missing Dog");
        assert!(matches!(err, StowError::InvalidSchema(_)));
    }

    #[test]
    fn rejects_undeclared_primary_key() {
        let bad = RecordType::new("Dog").primary_key("id");
        assert!(Schema::new([bad]).is_err());
    }

    #[test]
    fn rejects_float_primary_key() {
        let bad = RecordType::new("Dog")
            .primary_key("id")
            .field(FieldMapping::float("id"));
        assert!(Schema::new([bad]).is_err());
    }

    #[test]
    fn rejects_duplicate_types_and_fields() {
        assert!(Schema::new([dog(), dog()]).is_err());
        let twice = RecordType::new("A")
            .field(FieldMapping::text("x"))
            .field(FieldMapping::int("x"));
        assert!(Schema::new([twice]).is_err());
    }

    #[test]
    fn rejects_unknown_dependent() {
        let owner = RecordType::new("Owner").dependents(["Cat"]);
        assert!(Schema::new([owner, dog()]).is_err());
    }

    #[test]
    fn inbound_sweep_must_name_a_relationship_to_the_type() {
        let owner = RecordType::new("Owner")
            .field(FieldMapping::list("dogs", "Dog"))
            .field(FieldMapping::text("name"));
        let ok = dog().sweep(SweepPolicy::Inbound(vec![InboundRef::new("Owner", "dogs")]));
        assert!(Schema::new([owner.clone(), ok]).is_ok());

        let bad = dog().sweep(SweepPolicy::Inbound(vec![InboundRef::new("Owner", "name")]));
        assert!(Schema::new([owner, bad]).is_err());
    }

    #[test]
    fn parse_key_follows_key_kind() {
        let counter = RecordType::new("Counter")
            .primary_key("n")
            .field(FieldMapping::int("n"));
        assert_eq!(counter.parse_key("42").expect("int"), KeyValue::Int(42));
        assert!(counter.parse_key("x").is_err());
        assert_eq!(dog().parse_key("7").expect("text"), KeyValue::from("7"));
        assert!(RecordType::new("Free").parse_key("1").is_err());
    }

    #[test]
    fn unknown_type_lookup_fails() {
        let schema = Schema::new([dog()]).expect("schema");
        assert!(schema.get("Dog").is_ok());
        assert!(matches!(schema.get("Cat"), Err(StowError::UnknownType(_))));
    }
}
