//! Store configuration.

use anyhow::{anyhow, Context, Result};
use snapq_core::params::DEFAULT_LIMIT;
use snapq_sql::schema::DEFAULT_TABLE_PREFIX;
use snapq_sql::{QueryError, SchemaNames, SnapshotQueryAssembler, TextMatch};
use std::path::PathBuf;

/// Snapshot store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Database path
    pub db_path: PathBuf,

    /// Schema holding the snapshot tables
    pub schema: Option<String>,

    /// Prefix of every table name
    pub table_prefix: String,

    /// How text criteria are matched
    pub text_match: TextMatch,

    /// Page size used when the caller gives none
    pub default_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./snapq.db"),
            schema: None,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            text_match: TextMatch::Structured,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SNAPQ_DB_PATH`: SQLite database path
    /// - `SNAPQ_SCHEMA`: Schema holding the snapshot tables
    /// - `SNAPQ_TABLE_PREFIX`: Table name prefix
    /// - `SNAPQ_TEXT_MATCH`: "structured" or "substring"
    /// - `SNAPQ_DEFAULT_LIMIT`: Default page size
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(db_path) = lookup("SNAPQ_DB_PATH") {
            config.db_path = PathBuf::from(db_path);
        }

        if let Some(schema) = lookup("SNAPQ_SCHEMA") {
            config.schema = Some(schema);
        }

        if let Some(prefix) = lookup("SNAPQ_TABLE_PREFIX") {
            config.table_prefix = prefix;
        }

        if let Some(mode) = lookup("SNAPQ_TEXT_MATCH") {
            config.text_match = mode
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("Invalid SNAPQ_TEXT_MATCH")?;
        }

        if let Some(limit) = lookup("SNAPQ_DEFAULT_LIMIT") {
            config.default_limit = limit.parse().context("Invalid SNAPQ_DEFAULT_LIMIT")?;
        }

        // Surface bad identifiers at load time rather than on first query
        config
            .schema_names()
            .context("Invalid SNAPQ_SCHEMA or SNAPQ_TABLE_PREFIX")?;

        Ok(config)
    }

    /// Relation names described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the schema or prefix is not a plain identifier.
    pub fn schema_names(&self) -> Result<SchemaNames, QueryError> {
        SchemaNames::new(self.schema.as_deref(), &self.table_prefix)
    }

    /// Query assembler for this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the schema or prefix is not a plain identifier.
    pub fn assembler(&self) -> Result<SnapshotQueryAssembler, QueryError> {
        Ok(SnapshotQueryAssembler::new(self.schema_names()?).with_text_match(self.text_match))
    }
}
