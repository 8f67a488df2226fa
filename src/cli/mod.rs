//! Command-line interface.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `export` | Dump every table as one JSON bundle |
//! | `import` | Replay a bundle into the configured backend |
//! | `select` | Query one table |
//! | `count` | Count records, optionally grouped |
//! | `clear` | Delete every record of a table |
//! | `init-schema` | Create missing relational tables |
//! | `set-sequence` | Reset a table's auto-increment sequence |
//!
//! # Example Usage
//!
//! ```bash
//! # Move everything from SQLite to PostgreSQL
//! SQLITE_PATH=/var/lib/waline murmur export -o dump.json
//! PG_DB=waline murmur init-schema
//! PG_DB=waline murmur import dump.json
//!
//! # Latest ten approved comments of a page
//! murmur select Comment --filter '{"url":"/hello","status":"approved"}' --desc insertedAt --limit 10
//! ```

mod table;
mod transfer;

pub use table::{QueryArgs, cmd_clear, cmd_count, cmd_select, cmd_set_sequence};
pub use transfer::{cmd_export, cmd_import};

use crate::config::StorageConfig;
use crate::models::{QueryOptions, TABLES};
use crate::services::TransferService;
use crate::storage::StorageFactory;
use crate::{Error, Result};
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Murmur - storage tooling for a self-hosted comment service.
#[derive(Debug, Parser)]
#[command(name = "murmur")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML configuration file.
    #[arg(short, long, global = true, env = "MURMUR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Export every table as a JSON bundle.
    Export {
        /// Output file (stdout when omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a JSON bundle.
    Import {
        /// Bundle file written by `export`.
        file: PathBuf,
    },

    /// Select records from a table.
    Select {
        /// Table name.
        #[arg(value_parser = PossibleValuesParser::new(TABLES))]
        table: String,

        #[command(flatten)]
        query: QueryArgs,

        /// Sort descending by this field.
        #[arg(long)]
        desc: Option<String>,

        /// Maximum number of records.
        #[arg(long)]
        limit: Option<u64>,

        /// Records to skip.
        #[arg(long)]
        offset: Option<u64>,

        /// Fields to return (comma-separated).
        #[arg(long, value_delimiter = ',')]
        field: Vec<String>,
    },

    /// Count records in a table.
    Count {
        /// Table name.
        #[arg(value_parser = PossibleValuesParser::new(TABLES))]
        table: String,

        #[command(flatten)]
        query: QueryArgs,

        /// Group by these fields (comma-separated).
        #[arg(long, value_delimiter = ',')]
        group: Vec<String>,
    },

    /// Delete every record of a table.
    Clear {
        /// Table name.
        #[arg(value_parser = PossibleValuesParser::new(TABLES))]
        table: String,
    },

    /// Create missing tables (relational backends).
    InitSchema,

    /// Reset the auto-increment sequence of a table.
    SetSequence {
        /// Table name.
        #[arg(value_parser = PossibleValuesParser::new(TABLES))]
        table: String,

        /// Id the next insert should receive.
        next_id: u64,
    },
}

/// Loads configuration from `path`, or from the environment alone.
///
/// # Errors
///
/// Returns an error if the file cannot be read or no backend is configured.
pub fn load_config(path: Option<&std::path::Path>) -> Result<StorageConfig> {
    match path {
        Some(path) => StorageConfig::from_file(path),
        None => StorageConfig::from_env(),
    }
}

/// Connects to the configured backend and runs `command`, writing results to `out`.
///
/// # Errors
///
/// Returns an error if the backend cannot be reached or the command fails.
pub async fn run(command: Commands, config: &StorageConfig, out: &mut dyn Write) -> Result<()> {
    let factory = Arc::new(StorageFactory::connect(config).await?);
    run_with(command, factory, out).await
}

/// Runs `command` against an existing factory.
///
/// # Errors
///
/// Returns an error if the command fails.
pub async fn run_with(
    command: Commands,
    factory: Arc<StorageFactory>,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Commands::Export { output } => {
            cmd_export(&TransferService::new(factory), output.as_deref(), out).await
        },
        Commands::Import { file } => cmd_import(&TransferService::new(factory), &file, out).await,
        Commands::Select {
            table,
            query,
            desc,
            limit,
            offset,
            field,
        } => {
            let options = QueryOptions {
                desc,
                limit,
                offset,
                field: (!field.is_empty()).then_some(field),
                group: None,
            };
            cmd_select(&factory, &table, &query, &options, out).await
        },
        Commands::Count {
            table,
            query,
            group,
        } => cmd_count(&factory, &table, &query, group, out).await,
        Commands::Clear { table } => cmd_clear(&TransferService::new(factory), &table, out).await,
        Commands::InitSchema => {
            factory.ensure_schema().await?;
            write_line(out, &format!("schema ready ({})", factory.backend_type()))
        },
        Commands::SetSequence { table, next_id } => {
            cmd_set_sequence(&factory, &table, next_id, out).await
        },
    }
}

/// Writes one line of command output.
pub(crate) fn write_line(out: &mut dyn Write, line: &str) -> Result<()> {
    writeln!(out, "{line}").map_err(|e| Error::operation("write_output", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_arguments() {
        let cli = Cli::try_parse_from([
            "murmur",
            "select",
            "Comment",
            "--filter",
            r#"{"status":"approved"}"#,
            "--desc",
            "insertedAt",
            "--limit",
            "10",
            "--field",
            "nick,comment",
        ])
        .unwrap();
        let Commands::Select {
            table,
            query,
            desc,
            limit,
            field,
            ..
        } = cli.command
        else {
            panic!("expected select");
        };
        assert_eq!(table, "Comment");
        assert_eq!(query.filter.as_deref(), Some(r#"{"status":"approved"}"#));
        assert_eq!(desc.as_deref(), Some("insertedAt"));
        assert_eq!(limit, Some(10));
        assert_eq!(field, ["nick", "comment"]);
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        assert!(Cli::try_parse_from(["murmur", "clear", "Posts"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "murmur",
            "set-sequence",
            "Users",
            "100",
            "--verbose",
            "--config",
            "murmur.toml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("murmur.toml")));
        assert!(matches!(
            cli.command,
            Commands::SetSequence {
                next_id: 100,
                ..
            }
        ));
    }
}
