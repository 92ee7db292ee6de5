//! # stow CLI Module
//!
//! Command-line interface over a [`stow_core::Session`].
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show record counts per type
//! - `init` - Initialize a new database
//! - `import` - Import a JSON document into a record type
//! - `get` - Show one record by primary key
//! - `list` - Show every record of a type
//! - `delete` - Delete records and sweep orphaned dependents
//! - `export` - Write records as JSON to a file
//! - `copy` - Write a snapshot copy of the store
//! - `compact` - Compact the redb database file
//! - `hash` - BLAKE3 digest of the store snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stow_core::StowError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// stow - import nested JSON documents into a typed record store
///
/// Records with a primary key are upserted; keyless records are appended.
/// Deleting records sweeps dependents left without inbound references.
#[derive(Parser, Debug)]
#[command(name = "stow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database (redb file or snapshot copy)
    #[arg(short = 'D', long, global = true, default_value = "stow.db")]
    pub database: PathBuf,

    /// Storage backend: "memory" (snapshot file) or "redb" (ACID database)
    #[arg(short = 'B', long, global = true, default_value = "redb",
          value_parser = ["memory", "redb"])]
    pub backend: String,

    /// Path to the TOML schema file
    #[arg(short = 'S', long, global = true, default_value = "stow.toml")]
    pub schema: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Show record counts per type
    Status,

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Import a JSON object or array of objects
    Import {
        /// Record type of the top-level objects
        #[arg(short = 't', long = "type")]
        record_type: String,

        /// Path to the JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show one record by primary key
    Get {
        /// Record type
        #[arg(short = 't', long = "type")]
        record_type: String,

        /// Primary key value
        #[arg(short, long)]
        key: String,
    },

    /// Show every record of a type
    List {
        /// Record type
        #[arg(short = 't', long = "type")]
        record_type: String,
    },

    /// Delete records, then sweep orphaned dependents
    Delete {
        /// Record type
        #[arg(short = 't', long = "type")]
        record_type: String,

        /// Primary key of the record to delete
        #[arg(short, long, conflicts_with = "all", required_unless_present = "all")]
        key: Option<String>,

        /// Delete every record of the type
        #[arg(long)]
        all: bool,
    },

    /// Export records as JSON
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Only export this type (default: every type)
        #[arg(short = 't', long = "type")]
        record_type: Option<String>,
    },

    /// Write a snapshot copy of the committed store
    Copy {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compact the redb database file
    Compact,

    /// Compute BLAKE3 digest of the store snapshot
    Hash,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), StowError> {
    let store = StoreArgs {
        database: cli.database,
        backend: cli.backend,
        schema: cli.schema,
    };
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(&store, &host, port).await,
        Some(Commands::Status) | None => cmd_status(&store, json_mode),
        Some(Commands::Init { force }) => cmd_init(&store, force),
        Some(Commands::Import { record_type, file }) => {
            cmd_import(&store, json_mode, &record_type, &file)
        }
        Some(Commands::Get { record_type, key }) => cmd_get(&store, &record_type, &key),
        Some(Commands::List { record_type }) => cmd_list(&store, &record_type),
        Some(Commands::Delete {
            record_type,
            key,
            all,
        }) => {
            let target = match key {
                Some(key) if !all => DeleteTarget::Key(key),
                _ => DeleteTarget::All,
            };
            cmd_delete(&store, json_mode, &record_type, &target)
        }
        Some(Commands::Export {
            output,
            record_type,
        }) => cmd_export(&store, &output, record_type.as_deref()),
        Some(Commands::Copy { output }) => cmd_copy(&store, &output),
        Some(Commands::Compact) => cmd_compact(&store),
        Some(Commands::Hash) => cmd_hash(&store, json_mode),
    }
}
