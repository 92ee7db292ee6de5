//! # CLI Command Implementations
//!
//! Each `cmd_*` function opens the store, runs one operation and, for the
//! memory backend, writes the snapshot back.

use crate::{api, config};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use stow_core::{
    CleanupReport, Schema, Session, StowError, primitives::MAX_BATCH_LENGTH, record_to_json,
    snapshot_digest, type_to_json,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a JSON document accepted by `import` (100 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), StowError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| StowError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(StowError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path, rejecting anything that is not a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, StowError> {
    let canonical = path.canonicalize().map_err(|e| {
        StowError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(StowError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, StowError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        StowError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(StowError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| StowError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn to_pretty(value: &Value) -> Result<String, StowError> {
    serde_json::to_string_pretty(value).map_err(|e| StowError::SerializationError(e.to_string()))
}

// =============================================================================
// STORE ARGUMENTS
// =============================================================================

/// Where the records live and how they are typed.
#[derive(Debug, Clone)]
pub struct StoreArgs {
    pub database: PathBuf,
    pub backend: String,
    pub schema: PathBuf,
}

impl StoreArgs {
    fn is_redb(&self) -> bool {
        self.backend == "redb"
    }

    /// Load the schema file and open the database.
    pub fn open(&self) -> Result<Session, StowError> {
        let schema = config::load_schema(&self.schema)?;
        self.open_with(schema)
    }

    fn open_with(&self, schema: Schema) -> Result<Session, StowError> {
        if self.is_redb() {
            Session::with_redb(&self.database, schema)
        } else if self.database.exists() {
            Session::open_copy(&self.database, schema)
        } else {
            Ok(Session::new(schema))
        }
    }

    /// Persist the session. The redb backend commits on every write scope.
    pub fn save(&self, session: &Session) -> Result<(), StowError> {
        if session.is_persistent() {
            Ok(())
        } else {
            session.write_copy(&self.database)
        }
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(store: &StoreArgs, host: &str, port: u16) -> Result<(), StowError> {
    let session = store.open()?;

    println!("stow record server starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Backend:  {}", store.backend);
    println!("  Database: {:?}", store.database);
    println!("  Schema:   {:?} ({} types)", store.schema, session.schema().len());
    println!();
    println!("Endpoints:");
    println!("  GET    /health              - Health check");
    println!("  GET    /status              - Record counts");
    println!("  GET    /types               - Registered schema");
    println!("  POST   /import/{{type}}       - Import JSON");
    println!("  GET    /records/{{type}}      - List records");
    println!("  GET    /records/{{type}}/{{key}} - Get one record");
    println!("  DELETE /records/{{type}}/{{key}} - Delete one record");
    println!("  GET    /hash                - Snapshot digest");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, session).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show record counts per type.
pub fn cmd_status(store: &StoreArgs, json_mode: bool) -> Result<(), StowError> {
    let session = store.open()?;
    let mut counts = Map::new();
    for record_type in session.schema().types() {
        counts.insert(
            record_type.name.clone(),
            Value::from(session.count(&record_type.name)?),
        );
    }
    let total = session.len()?;

    if json_mode {
        let output = serde_json::json!({
            "database": store.database.to_string_lossy(),
            "backend": store.backend,
            "record_count": total,
            "types": counts,
        });
        println!("{}", to_pretty(&output)?);
        return Ok(());
    }

    println!("stow Store Status");
    println!("=================");
    println!("Database: {:?}", store.database);
    println!("Backend:  {}", store.backend);
    println!();
    for (name, count) in &counts {
        println!("{:<20} {}", name, count);
    }
    println!();
    println!("Total records: {}", total);

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(store: &StoreArgs, force: bool) -> Result<(), StowError> {
    if store.database.exists() {
        if !force {
            return Err(StowError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&store.database)
            .map_err(|e| StowError::IoError(format!("Remove database: {}", e)))?;
    }

    let session = store.open_with(Schema::default())?;
    store.save(&session)?;
    println!(
        "Initialized new {} database at {:?}",
        store.backend, store.database
    );
    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Import a JSON object or array of objects.
pub fn cmd_import(
    store: &StoreArgs,
    json_mode: bool,
    record_type: &str,
    file: &Path,
) -> Result<(), StowError> {
    tracing::info!("Importing {:?} as {}", file, record_type);

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let contents = std::fs::read(&validated_path)
        .map_err(|e| StowError::IoError(format!("Read file: {}", e)))?;
    let document: Value = serde_json::from_slice(&contents)
        .map_err(|e| StowError::DeserializationError(e.to_string()))?;

    if let Value::Array(items) = &document {
        if items.len() > MAX_BATCH_LENGTH {
            return Err(StowError::SerializationError(format!(
                "Document count {} exceeds maximum allowed {}",
                items.len(),
                MAX_BATCH_LENGTH
            )));
        }
    }

    let mut session = store.open()?;
    let ids = session.import(record_type, &document)?;
    store.save(&session)?;

    if json_mode {
        let ids: Vec<u64> = ids.iter().map(|id| id.0).collect();
        let output = serde_json::json!({
            "record_type": record_type,
            "count": ids.len(),
            "ids": ids,
        });
        println!("{}", to_pretty(&output)?);
    } else {
        println!("Imported {} {} record(s)", ids.len(), record_type);
    }
    Ok(())
}

// =============================================================================
// LOOKUP COMMANDS
// =============================================================================

/// Show one record by primary key.
pub fn cmd_get(store: &StoreArgs, record_type: &str, key: &str) -> Result<(), StowError> {
    let session = store.open()?;
    let key = session.schema().get(record_type)?.parse_key(key)?;

    match session.find(record_type, &key)? {
        Some(record) => println!("{}", to_pretty(&record_to_json(&session, record.id)?)?),
        None => println!("No {} with key {}", record_type, key),
    }
    Ok(())
}

/// Show every record of a type.
pub fn cmd_list(store: &StoreArgs, record_type: &str) -> Result<(), StowError> {
    let session = store.open()?;
    println!("{}", to_pretty(&type_to_json(&session, record_type)?)?);
    Ok(())
}

// =============================================================================
// DELETE COMMAND
// =============================================================================

/// Which records of a type to delete.
#[derive(Debug, Clone)]
pub enum DeleteTarget {
    Key(String),
    All,
}

/// Delete records, then report the cascade sweep.
pub fn cmd_delete(
    store: &StoreArgs,
    json_mode: bool,
    record_type: &str,
    target: &DeleteTarget,
) -> Result<(), StowError> {
    let mut session = store.open()?;

    let (deleted, cleanup) = match target {
        DeleteTarget::Key(raw) => {
            let key = session.schema().get(record_type)?.parse_key(raw)?;
            let Some(record) = session.find(record_type, &key)? else {
                println!("No {} with key {}", record_type, key);
                return Ok(());
            };
            session.write_with_cleanup(|s| s.delete(record.id).map(|()| 1))?
        }
        DeleteTarget::All => session.write_with_cleanup(|s| s.delete_all_of(record_type))?,
    };
    store.save(&session)?;

    let cleanup = cleanup.unwrap_or_default();
    if json_mode {
        let output = serde_json::json!({
            "record_type": record_type,
            "deleted": deleted,
            "cleaned_up": cleanup.removed,
        });
        println!("{}", to_pretty(&output)?);
    } else {
        println!("Deleted {} {} record(s)", deleted, record_type);
        print_cleanup(&cleanup);
    }
    Ok(())
}

fn print_cleanup(cleanup: &CleanupReport) {
    if cleanup.total() == 0 {
        return;
    }
    println!("Cleanup removed {} orphaned record(s):", cleanup.total());
    for (name, count) in &cleanup.removed {
        println!("  {:<20} {}", name, count);
    }
}

// =============================================================================
// EXPORT COMMANDS
// =============================================================================

/// Export records as JSON: an array for one type, an object keyed by type
/// name otherwise.
pub fn cmd_export(
    store: &StoreArgs,
    output: &Path,
    record_type: Option<&str>,
) -> Result<(), StowError> {
    let session = store.open()?;
    let validated_output = validate_output_path(output)?;

    let document = match record_type {
        Some(name) => type_to_json(&session, name)?,
        None => {
            let mut all = Map::new();
            for record_type in session.schema().types() {
                all.insert(
                    record_type.name.clone(),
                    type_to_json(&session, &record_type.name)?,
                );
            }
            Value::Object(all)
        }
    };

    std::fs::write(&validated_output, to_pretty(&document)?)
        .map_err(|e| StowError::IoError(format!("Write file: {}", e)))?;
    println!("Exported to {:?}", validated_output);
    Ok(())
}

/// Write a snapshot copy of the committed store.
pub fn cmd_copy(store: &StoreArgs, output: &Path) -> Result<(), StowError> {
    let session = store.open()?;
    let validated_output = validate_output_path(output)?;
    session.write_copy(&validated_output)?;
    println!("Copied {} record(s) to {:?}", session.len()?, validated_output);
    Ok(())
}

/// Compact the redb database file.
pub fn cmd_compact(store: &StoreArgs) -> Result<(), StowError> {
    if !store.is_redb() {
        println!("Nothing to compact for the {} backend", store.backend);
        return Ok(());
    }
    let mut session = store.open()?;
    session.compact()?;
    println!("Compacted {:?}", store.database);
    Ok(())
}

/// BLAKE3 digest of the store snapshot.
pub fn cmd_hash(store: &StoreArgs, json_mode: bool) -> Result<(), StowError> {
    let session = store.open()?;
    let hash = snapshot_digest(&session.snapshot()?);

    if json_mode {
        let output = serde_json::json!({
            "algorithm": "blake3",
            "hash": hash,
            "record_count": session.len()?,
        });
        println!("{}", to_pretty(&output)?);
    } else {
        println!("{}", hash);
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
