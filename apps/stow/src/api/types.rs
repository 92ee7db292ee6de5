//! # API Request/Response Types
//!
//! JSON bodies returned by the HTTP API. Import requests take the raw JSON
//! document as their body, so only responses are modelled here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use stow_core::{CleanupReport, RecordId, RecordType};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS & SCHEMA
// =============================================================================

/// Store status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub persistent: bool,
    pub record_count: usize,
    /// Live record count per registered type.
    pub types: BTreeMap<String, usize>,
}

/// Registered record types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypesResponse {
    pub types: Vec<RecordType>,
}

// =============================================================================
// IMPORT RESPONSE
// =============================================================================

/// Result of importing a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub success: bool,
    pub record_type: String,
    /// Ids of the top-level records, in document order.
    pub ids: Vec<u64>,
    pub error: Option<String>,
}

impl ImportResponse {
    pub fn success(record_type: &str, ids: &[RecordId]) -> Self {
        Self {
            success: true,
            record_type: record_type.to_string(),
            ids: ids.iter().map(|id| id.0).collect(),
            error: None,
        }
    }

    pub fn error(record_type: &str, msg: impl Into<String>) -> Self {
        Self {
            success: false,
            record_type: record_type.to_string(),
            ids: Vec::new(),
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// RECORD RESPONSES
// =============================================================================

/// One exported record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordResponse {
    pub success: bool,
    pub record: Option<Value>,
    pub error: Option<String>,
}

impl RecordResponse {
    pub fn found(record: Value) -> Self {
        Self {
            success: true,
            record: Some(record),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            record: None,
            error: Some(msg.into()),
        }
    }
}

/// Every exported record of a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub success: bool,
    pub records: Vec<Value>,
    pub error: Option<String>,
}

impl RecordsResponse {
    pub fn success(records: Vec<Value>) -> Self {
        Self {
            success: true,
            records,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            records: Vec::new(),
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// DELETE RESPONSE
// =============================================================================

/// Result of a delete and its cascade sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub deleted: usize,
    /// Orphans removed by the sweep, per type.
    pub cleaned_up: BTreeMap<String, usize>,
    pub error: Option<String>,
}

impl DeleteResponse {
    pub fn success(deleted: usize, cleanup: Option<CleanupReport>) -> Self {
        Self {
            success: true,
            deleted,
            cleaned_up: cleanup.map(|c| c.removed).unwrap_or_default(),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            deleted: 0,
            cleaned_up: BTreeMap::new(),
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// HASH RESPONSE
// =============================================================================

/// BLAKE3 digest of the committed snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashResponse {
    pub success: bool,
    pub algorithm: String,
    pub hash: Option<String>,
    pub record_count: usize,
    pub error: Option<String>,
}

impl HashResponse {
    pub fn success(hash: String, record_count: usize) -> Self {
        Self {
            success: true,
            algorithm: "blake3".to_string(),
            hash: Some(hash),
            record_count,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            algorithm: "blake3".to_string(),
            hash: None,
            record_count: 0,
            error: Some(msg.into()),
        }
    }
}
