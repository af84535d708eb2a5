//! # SnapQ CLI
//!
//! Assemble snapshot queries and run them against a `SQLite` audit store.
//!
//! Store settings come from `SNAPQ_*` environment variables; see
//! `snapq_store::StoreConfig`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapq_store::{SqliteSnapshotStore, StoreConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod args;

use args::QueryArgs;

#[derive(Debug, Parser)]
#[command(name = "snapq")]
#[command(about = "Snapshot queries over a SQLite audit store", long_about = None)]
struct Cli {
    /// Database file, overriding the configured path
    #[arg(long, env = "SNAPQ_DB_PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the assembled SQL and its bound parameters
    Sql(QueryArgs),
    /// Run the query and print one JSON snapshot per line
    Query(QueryArgs),
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries query output only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = StoreConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Sql(args) => {
            let (filter, params) = args.into_query(config.default_limit)?;
            let assembler = config.assembler()?;
            let query = assembler
                .assemble(&filter, &params)
                .context("Failed to assemble query")?;
            print!("{query}");
        }
        Commands::Query(args) => {
            let (filter, params) = args.into_query(config.default_limit)?;

            tracing::info!(
                db_path = %config.db_path.display(),
                filter = %filter,
                "Running snapshot query"
            );

            let store = SqliteSnapshotStore::from_config(&config)
                .context("Failed to open snapshot store")?;
            let snapshots = store
                .find_snapshots(&filter, &params)
                .context("Snapshot query failed")?;

            for snapshot in &snapshots {
                println!("{}", serde_json::to_string(snapshot)?);
            }
        }
    }

    Ok(())
}
