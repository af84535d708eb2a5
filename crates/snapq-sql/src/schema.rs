//! Logical names of the snapshot store relations.
//!
//! Table names are built from an optional schema and a table prefix:
//! `[{schema}.]{prefix}{relation}`, e.g. `audit.snapq_snapshot`.
//!
//! Names are interpolated into SQL text, so every component is checked to
//! be a plain identifier when the value is constructed. Column names are
//! fixed and exposed as constants.

use crate::error::QueryError;

/// Default table prefix.
pub const DEFAULT_TABLE_PREFIX: &str = "snapq_";

/// Snapshot relation columns.
pub mod snapshot {
    /// Primary key, insertion sequence
    pub const PK: &str = "snapshot_pk";
    /// `INITIAL` / `UPDATE` / `TERMINAL`
    pub const TYPE: &str = "snapshot_type";
    /// Per-object version
    pub const VERSION: &str = "snapshot_version";
    /// Serialized state (JSON object)
    pub const STATE: &str = "snapshot_state";
    /// Serialized changed property names (JSON array)
    pub const CHANGED: &str = "snapshot_changed";
    /// Declared type name
    pub const MANAGED_TYPE: &str = "snapshot_managed_type";
    /// Identity foreign key
    pub const GLOBAL_ID_FK: &str = "snapshot_global_id_fk";
    /// Commit foreign key
    pub const COMMIT_FK: &str = "snapshot_commit_fk";
}

/// Commit relation columns.
pub mod commit {
    /// Primary key, insertion sequence
    pub const PK: &str = "commit_pk";
    /// Author
    pub const AUTHOR: &str = "commit_author";
    /// Commit date, milliseconds since UNIX epoch
    pub const DATE: &str = "commit_date";
    /// Numeric commit id
    pub const ID: &str = "commit_id";
}

/// Commit property relation columns.
pub mod commit_property {
    /// Commit foreign key
    pub const COMMIT_FK: &str = "commit_property_commit_fk";
    /// Property key
    pub const NAME: &str = "commit_property_name";
    /// Property value
    pub const VALUE: &str = "commit_property_value";
}

/// Identity relation columns.
pub mod global_id {
    /// Primary key
    pub const PK: &str = "global_id_pk";
    /// Entity local id
    pub const LOCAL_ID: &str = "local_id";
    /// Value object fragment
    pub const FRAGMENT: &str = "fragment";
    /// Declared type name
    pub const TYPE_NAME: &str = "type_name";
    /// Owning identity foreign key
    pub const OWNER_ID_FK: &str = "owner_id_fk";
}

/// Schema and table naming configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNames {
    schema: Option<String>,
    prefix: String,
}

impl Default for SchemaNames {
    fn default() -> Self {
        Self {
            schema: None,
            prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

impl SchemaNames {
    /// Create schema names.
    ///
    /// # Errors
    ///
    /// Returns error if the schema or prefix is not a plain identifier.
    pub fn new(schema: Option<&str>, prefix: &str) -> Result<Self, QueryError> {
        if let Some(schema) = schema {
            check_identifier(schema)?;
        }
        if !prefix.is_empty() {
            check_identifier(prefix)?;
        }

        Ok(Self {
            schema: schema.map(ToString::to_string),
            prefix: prefix.to_string(),
        })
    }

    /// Default names inside the given schema.
    ///
    /// # Errors
    ///
    /// Returns error if `schema` is not a plain identifier.
    pub fn with_schema(schema: &str) -> Result<Self, QueryError> {
        Self::new(Some(schema), DEFAULT_TABLE_PREFIX)
    }

    /// Configured schema, if any.
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Build a qualified table name.
    fn table(&self, relation: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}{relation}", self.prefix),
            None => format!("{}{relation}", self.prefix),
        }
    }

    /// Snapshot table.
    #[must_use]
    pub fn snapshot_table(&self) -> String {
        self.table("snapshot")
    }

    /// Commit table.
    #[must_use]
    pub fn commit_table(&self) -> String {
        self.table("commit")
    }

    /// Commit property table.
    #[must_use]
    pub fn commit_property_table(&self) -> String {
        self.table("commit_property")
    }

    /// Identity table.
    #[must_use]
    pub fn global_id_table(&self) -> String {
        self.table("global_id")
    }

    /// Unqualified name of a relation, for index names.
    #[must_use]
    pub fn local_name(&self, relation: &str) -> String {
        format!("{}{relation}", self.prefix)
    }
}

fn check_identifier(name: &str) -> Result<(), QueryError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(QueryError::InvalidIdentifier(name.to_string()))
    }
}
