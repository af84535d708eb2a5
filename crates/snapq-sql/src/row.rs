//! Raw result rows and the execution interface.

use crate::query::SnapshotQuery;
use crate::schema::{commit, global_id, snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snapq_core::{
    CdoSnapshot, CommitId, CommitIdError, CommitMetadata, GlobalId, SnapshotType,
    UnknownSnapshotType,
};
use std::collections::BTreeMap;

/// Column alias of the owner's type name.
pub const OWNER_TYPE_NAME: &str = "owner_type_name";
/// Column alias of the owner's local id.
pub const OWNER_LOCAL_ID: &str = "owner_local_id";
/// Column alias of the owner's fragment.
pub const OWNER_FRAGMENT: &str = "owner_fragment";

/// Select list matching [`SnapshotRow`].
#[must_use]
pub fn select_columns() -> String {
    [
        format!("s.{}", snapshot::PK),
        format!("s.{}", snapshot::STATE),
        format!("s.{}", snapshot::TYPE),
        format!("s.{}", snapshot::VERSION),
        format!("s.{}", snapshot::CHANGED),
        format!("s.{}", snapshot::MANAGED_TYPE),
        format!("c.{}", commit::PK),
        format!("c.{}", commit::AUTHOR),
        format!("c.{}", commit::DATE),
        format!("c.{}", commit::ID),
        format!("g.{}", global_id::TYPE_NAME),
        format!("g.{}", global_id::LOCAL_ID),
        format!("g.{}", global_id::FRAGMENT),
        format!("o.{} AS {OWNER_TYPE_NAME}", global_id::TYPE_NAME),
        format!("o.{} AS {OWNER_LOCAL_ID}", global_id::LOCAL_ID),
        format!("o.{} AS {OWNER_FRAGMENT}", global_id::FRAGMENT),
    ]
    .join(", ")
}

/// One row of a snapshot query result, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    /// Snapshot sequence
    pub snapshot_pk: i64,
    /// Serialized state
    pub state: String,
    /// Snapshot type text
    pub snapshot_type: String,
    /// Version
    pub version: i64,
    /// Serialized changed property names
    pub changed_properties: String,
    /// Managed type
    pub managed_type: String,
    /// Commit sequence
    pub commit_pk: i64,
    /// Commit author
    pub author: String,
    /// Commit date in milliseconds since UNIX epoch
    pub commit_date_ms: i64,
    /// Numeric commit id
    pub commit_id: f64,
    /// Identity type name
    pub type_name: String,
    /// Identity local id
    pub local_id: Option<String>,
    /// Identity fragment
    pub fragment: Option<String>,
    /// Owner type name
    pub owner_type_name: Option<String>,
    /// Owner local id
    pub owner_local_id: Option<String>,
    /// Owner fragment
    pub owner_fragment: Option<String>,
}

impl SnapshotRow {
    /// Rebuild the identity, including its owner.
    #[must_use]
    pub fn global_id(&self) -> GlobalId {
        let owner = self.owner_type_name.as_ref().map(|type_name| {
            Box::new(GlobalId {
                type_name: type_name.clone(),
                local_id: self.owner_local_id.clone(),
                fragment: self.owner_fragment.clone(),
                owner: None,
            })
        });

        GlobalId {
            type_name: self.type_name.clone(),
            local_id: self.local_id.clone(),
            fragment: self.fragment.clone(),
            owner,
        }
    }

    /// Decode into a snapshot, attaching the commit's properties.
    ///
    /// # Errors
    ///
    /// Returns error if a stored column cannot be decoded.
    pub fn into_snapshot(
        self,
        commit_properties: BTreeMap<String, String>,
    ) -> Result<CdoSnapshot, RowError> {
        let global_id = self.global_id();

        let state: Map<String, Value> =
            serde_json::from_str(&self.state).map_err(|e| RowError::State(e.to_string()))?;
        let changed_properties: Vec<String> = serde_json::from_str(&self.changed_properties)
            .map_err(|e| RowError::ChangedProperties(e.to_string()))?;
        let snapshot_type = self.snapshot_type.parse::<SnapshotType>()?;
        let version =
            u64::try_from(self.version).map_err(|_| RowError::Version(self.version))?;
        let commit_date = DateTime::<Utc>::from_timestamp_millis(self.commit_date_ms)
            .ok_or(RowError::CommitDate(self.commit_date_ms))?;

        Ok(CdoSnapshot {
            global_id,
            managed_type: self.managed_type,
            state,
            version,
            snapshot_type,
            changed_properties,
            commit: CommitMetadata {
                id: CommitId::from_number(self.commit_id)?,
                author: self.author,
                commit_date,
                properties: commit_properties,
            },
        })
    }
}

/// Executes assembled snapshot queries.
pub trait SnapshotQueryExecutor {
    /// Execution failure, surfaced verbatim.
    type Error;

    /// Run `query`, returning rows in query order.
    ///
    /// # Errors
    ///
    /// Returns the store's error if execution fails.
    fn execute(&self, query: &SnapshotQuery) -> Result<Vec<SnapshotRow>, Self::Error>;
}

/// A stored column could not be decoded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    /// State is not a JSON object
    #[error("undecodable snapshot state: {0}")]
    State(String),
    /// Changed properties are not a JSON string array
    #[error("undecodable changed properties: {0}")]
    ChangedProperties(String),
    /// Unknown snapshot type
    #[error(transparent)]
    SnapshotType(#[from] UnknownSnapshotType),
    /// Negative version
    #[error("invalid snapshot version: {0}")]
    Version(i64),
    /// Commit date outside the representable range
    #[error("invalid commit date: {0}")]
    CommitDate(i64),
    /// Commit id not in `major.minor` form
    #[error(transparent)]
    CommitId(#[from] CommitIdError),
}
