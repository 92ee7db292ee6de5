//! # API Endpoint Handlers
//!
//! Every handler takes the session lock for the duration of one operation.
//! Reads share the lock; imports and deletes hold it exclusively.

use super::{
    AppState,
    types::{
        DeleteResponse, HashResponse, HealthResponse, ImportResponse, RecordResponse,
        RecordsResponse, StatusResponse, TypesResponse,
    },
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use std::collections::BTreeMap;
use stow_core::{
    KeyValue, Session, StowError, primitives::MAX_BATCH_LENGTH, record_to_json, snapshot_digest,
    type_to_json,
};

/// HTTP status for a failed operation.
fn error_status(err: &StowError) -> StatusCode {
    match err {
        StowError::UnknownType(_) | StowError::RecordNotFound(_) => StatusCode::NOT_FOUND,
        StowError::SchemaContract { .. } | StowError::UnknownField { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        StowError::Store { .. }
        | StowError::IoError(_)
        | StowError::SerializationError(_)
        | StowError::DeserializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StowError::InvalidSchema(_) | StowError::NotInTransaction => StatusCode::BAD_REQUEST,
    }
}

fn parse_key(session: &Session, record_type: &str, raw: &str) -> Result<KeyValue, StowError> {
    session.schema().get(record_type)?.parse_key(raw)
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Record counts per type.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;

    let mut types = BTreeMap::new();
    for record_type in session.schema().types() {
        let count = session.count(&record_type.name).unwrap_or(0);
        types.insert(record_type.name.clone(), count);
    }

    let response = StatusResponse {
        persistent: session.is_persistent(),
        record_count: session.len().unwrap_or(0),
        types,
    };
    (StatusCode::OK, Json(response))
}

/// The registered schema.
pub async fn types_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let types = session.schema().types().cloned().collect();
    (StatusCode::OK, Json(TypesResponse { types }))
}

// =============================================================================
// IMPORT HANDLER
// =============================================================================

/// Import a JSON object or array of objects as `record_type`.
pub async fn import_handler(
    State(state): State<AppState>,
    Path(record_type): Path<String>,
    Json(document): Json<Value>,
) -> impl IntoResponse {
    if let Value::Array(items) = &document {
        if items.len() > MAX_BATCH_LENGTH {
            return (
                StatusCode::BAD_REQUEST,
                Json(ImportResponse::error(
                    &record_type,
                    format!(
                        "Document count {} exceeds maximum allowed {}",
                        items.len(),
                        MAX_BATCH_LENGTH
                    ),
                )),
            );
        }
    }

    let mut session = state.session.write().await;
    match session.import(&record_type, &document) {
        Ok(ids) => (
            StatusCode::OK,
            Json(ImportResponse::success(&record_type, &ids)),
        ),
        Err(e) => (
            error_status(&e),
            Json(ImportResponse::error(
                &record_type,
                format!("Import failed: {}", e),
            )),
        ),
    }
}

// =============================================================================
// RECORD HANDLERS
// =============================================================================

/// Every record of a type.
pub async fn list_handler(
    State(state): State<AppState>,
    Path(record_type): Path<String>,
) -> impl IntoResponse {
    let session = state.session.read().await;
    match type_to_json(&session, &record_type) {
        Ok(Value::Array(records)) => (StatusCode::OK, Json(RecordsResponse::success(records))),
        Ok(other) => (StatusCode::OK, Json(RecordsResponse::success(vec![other]))),
        Err(e) => (error_status(&e), Json(RecordsResponse::error(e.to_string()))),
    }
}

/// One record by primary key.
pub async fn get_handler(
    State(state): State<AppState>,
    Path((record_type, raw_key)): Path<(String, String)>,
) -> impl IntoResponse {
    let session = state.session.read().await;
    let found = parse_key(&session, &record_type, &raw_key)
        .and_then(|key| session.find(&record_type, &key));

    match found {
        Ok(Some(record)) => match record_to_json(&session, record.id) {
            Ok(json) => (StatusCode::OK, Json(RecordResponse::found(json))),
            Err(e) => (error_status(&e), Json(RecordResponse::error(e.to_string()))),
        },
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(RecordResponse::error(format!(
                "No {} with key {}",
                record_type, raw_key
            ))),
        ),
        Err(e) => (error_status(&e), Json(RecordResponse::error(e.to_string()))),
    }
}

/// Delete one record by primary key and sweep orphaned dependents.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((record_type, raw_key)): Path<(String, String)>,
) -> impl IntoResponse {
    let mut session = state.session.write().await;
    let found = parse_key(&session, &record_type, &raw_key)
        .and_then(|key| session.find(&record_type, &key));

    let record = match found {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(DeleteResponse::error(format!(
                    "No {} with key {}",
                    record_type, raw_key
                ))),
            );
        }
        Err(e) => return (error_status(&e), Json(DeleteResponse::error(e.to_string()))),
    };

    match session.write_with_cleanup(|s| s.delete(record.id)) {
        Ok(((), cleanup)) => {
            tracing::info!(record_type = %record_type, key = %raw_key, "deleted record");
            (StatusCode::OK, Json(DeleteResponse::success(1, cleanup)))
        }
        Err(e) => (
            error_status(&e),
            Json(DeleteResponse::error(format!("Delete failed: {}", e))),
        ),
    }
}

// =============================================================================
// HASH HANDLER
// =============================================================================

/// BLAKE3 digest of the committed snapshot.
pub async fn hash_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let digest = session
        .snapshot()
        .and_then(|bytes| Ok((snapshot_digest(&bytes), session.len()?)));

    match digest {
        Ok((hash, count)) => (StatusCode::OK, Json(HashResponse::success(hash, count))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HashResponse::error(format!("Snapshot failed: {}", e))),
        ),
    }
}
