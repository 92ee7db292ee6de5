//! # Schema Configuration
//!
//! Loads the record-type declarations from a TOML file.
//!
//! ```toml
//! [[types]]
//! name = "User"
//! primary_key = "id"
//! dependents = ["Dog"]
//! fields = [
//!     { name = "id", kind = "int" },
//!     { name = "name", kind = "text", json_key = "full_name" },
//!     { name = "dogs", kind = "list", target = "Dog" },
//! ]
//!
//! [[types]]
//! name = "Dog"
//! primary_key = "id"
//! sweep = { inbound = [{ type = "User", field = "dogs" }] }
//! fields = [{ name = "id", kind = "int" }, { name = "color", kind = "text" }]
//! ```

use serde::Deserialize;
use std::path::Path;
use stow_core::{RecordType, Schema, StowError};

/// Largest schema file accepted (1 MB).
pub const MAX_SCHEMA_FILE_SIZE: u64 = 1024 * 1024;

/// On-disk layout of a schema file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaFile {
    #[serde(default)]
    types: Vec<RecordType>,
}

/// Parse and validate a schema from TOML text.
pub fn parse_schema(text: &str) -> Result<Schema, StowError> {
    let file: SchemaFile =
        toml::from_str(text).map_err(|e| StowError::InvalidSchema(e.to_string()))?;
    Schema::new(file.types)
}

/// Read and validate a schema file.
pub fn load_schema(path: &Path) -> Result<Schema, StowError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        StowError::IoError(format!(
            "Cannot read schema file '{}': {}",
            path.display(),
            e
        ))
    })?;
    if metadata.len() > MAX_SCHEMA_FILE_SIZE {
        return Err(StowError::IoError(format!(
            "Schema file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_SCHEMA_FILE_SIZE
        )));
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| StowError::IoError(format!("Failed to read schema: {}", e)))?;
    let schema = parse_schema(&text)?;
    tracing::debug!(path = %path.display(), types = schema.len(), "loaded schema");
    Ok(schema)
}

// =============================================================================
// TESTS
// =============================================================================
