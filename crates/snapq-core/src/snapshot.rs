//! Snapshot model.
//!
//! A snapshot is the state of one tracked object at one commit. Objects are
//! identified by a [`GlobalId`]; value objects carry a back-reference to the
//! entity that owns them.

use crate::commit::CommitMetadata;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The lifecycle stage a snapshot records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotType {
    /// First snapshot of a new object
    Initial,
    /// Subsequent change
    #[default]
    Update,
    /// Object removed
    Terminal,
}

impl SnapshotType {
    /// Stored text form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Initial => "INITIAL",
            SnapshotType::Update => "UPDATE",
            SnapshotType::Terminal => "TERMINAL",
        }
    }
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotType {
    type Err = UnknownSnapshotType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIAL" => Ok(SnapshotType::Initial),
            "UPDATE" => Ok(SnapshotType::Update),
            "TERMINAL" => Ok(SnapshotType::Terminal),
            other => Err(UnknownSnapshotType(other.to_string())),
        }
    }
}

/// Stored snapshot type text was not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown snapshot type: {0:?}")]
pub struct UnknownSnapshotType(pub String);

/// Identity of one versioned object.
///
/// Entities are identified by type name and local id. Value objects are
/// identified by their owner and the property path (`fragment`) under which
/// the owner holds them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId {
    /// Declared type of the object
    pub type_name: String,
    /// Per-type key (entities only)
    pub local_id: Option<String>,
    /// Path segment under the owner (value objects only)
    pub fragment: Option<String>,
    /// Owning entity, one level deep
    pub owner: Option<Box<GlobalId>>,
}

impl GlobalId {
    /// Identity of an entity instance.
    #[must_use]
    pub fn instance(type_name: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            local_id: Some(local_id.into()),
            fragment: None,
            owner: None,
        }
    }

    /// Identity of a value object owned by `owner`.
    #[must_use]
    pub fn value_object(
        type_name: impl Into<String>,
        owner: GlobalId,
        fragment: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            local_id: None,
            fragment: Some(fragment.into()),
            owner: Some(Box::new(owner)),
        }
    }

    /// The owning entity, if this is a value object.
    #[must_use]
    pub fn owner(&self) -> Option<&GlobalId> {
        self.owner.as_deref()
    }

    /// Check whether `self` is directly owned by `other`.
    #[must_use]
    pub fn is_owned_by(&self, other: &GlobalId) -> bool {
        self.owner() == Some(other)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.owner, &self.fragment) {
            (Some(owner), Some(fragment)) => write!(f, "{owner}#{fragment}"),
            _ => write!(
                f,
                "{}/{}",
                self.type_name,
                self.local_id.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// The persisted state of one object at one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdoSnapshot {
    /// Object identity
    pub global_id: GlobalId,
    /// Declared type name
    pub managed_type: String,
    /// Property name -> value
    pub state: Map<String, Value>,
    /// Positive, strictly increasing per object
    pub version: u64,
    /// Lifecycle stage
    pub snapshot_type: SnapshotType,
    /// Properties changed since the previous version
    pub changed_properties: Vec<String>,
    /// Commit that wrote this snapshot
    pub commit: CommitMetadata,
}

impl CdoSnapshot {
    /// Check whether `name` is among the changed properties.
    #[must_use]
    pub fn has_changed_property(&self, name: &str) -> bool {
        self.changed_properties.iter().any(|p| p == name)
    }

    /// Get a property value from the state.
    #[must_use]
    pub fn property_value(&self, name: &str) -> Option<&Value> {
        self.state.get(name)
    }

    /// Check whether this snapshot records object creation.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.snapshot_type == SnapshotType::Initial
    }
}
