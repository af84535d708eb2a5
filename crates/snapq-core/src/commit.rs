//! Commit identity and metadata.
//!
//! A commit is one unit of change in the audit store. It carries:
//! - A `major.minor` identifier, totally ordered and numerically sortable
//! - The author and the commit date
//! - Free-form string properties attached by the committing application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Largest minor component representable in the numeric form.
const MAX_MINOR: u32 = 99;

/// Largest major component whose numeric form keeps every minor distinct.
///
/// Above 2^46 the spacing of `f64` values exceeds 0.01.
pub const MAX_MAJOR: u64 = (1 << 46) - 1;

/// Identifier of a commit, e.g. `"12.01"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId {
    /// Major sequence, one per commit
    pub major: u64,
    /// Minor sequence for commits sharing a major value
    pub minor: u32,
}

impl CommitId {
    /// Create a commit id.
    ///
    /// # Errors
    ///
    /// Returns error if `minor` does not fit in two decimal digits or
    /// `major` exceeds [`MAX_MAJOR`].
    pub fn new(major: u64, minor: u32) -> Result<Self, CommitIdError> {
        let id = Self { major, minor };
        id.validate()?;
        Ok(id)
    }

    /// Commit id with a zero minor component.
    ///
    /// The range is not checked here; stores call [`Self::validate`]
    /// before the numeric form is used.
    #[must_use]
    pub fn major(major: u64) -> Self {
        Self { major, minor: 0 }
    }

    /// Check both components fit the numeric form.
    ///
    /// # Errors
    ///
    /// Returns error if either component is out of range.
    pub fn validate(&self) -> Result<(), CommitIdError> {
        if self.minor > MAX_MINOR {
            return Err(CommitIdError::MinorOutOfRange(self.minor));
        }
        if self.major > MAX_MAJOR {
            return Err(CommitIdError::MajorOutOfRange(self.major));
        }
        Ok(())
    }

    /// Numeric form stored in the commit relation: `major + minor / 100`.
    ///
    /// Both the write and the query path derive the number through this
    /// function, so equal ids always produce bit-identical values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value_as_number(&self) -> f64 {
        self.major as f64 + f64::from(self.minor) / 100.0
    }

    /// Recover a commit id from its numeric form.
    ///
    /// # Errors
    ///
    /// Returns error if the number is negative, not finite, or carries more
    /// than two decimal digits.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn from_number(value: f64) -> Result<Self, CommitIdError> {
        if !value.is_finite() || value < 0.0 {
            return Err(CommitIdError::Malformed(value.to_string()));
        }
        let major = value.trunc();
        let minor = ((value - major) * 100.0).round();
        if minor > f64::from(MAX_MINOR) {
            return Err(CommitIdError::Malformed(value.to_string()));
        }

        let id = Self::new(major as u64, minor as u32)?;
        if id.value_as_number().to_bits() != value.to_bits() {
            return Err(CommitIdError::Malformed(value.to_string()));
        }
        Ok(id)
    }
}

impl Ord for CommitId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => self.minor.cmp(&other.minor),
            ord => ord,
        }
    }
}

impl PartialOrd for CommitId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

impl FromStr for CommitId {
    type Err = CommitIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, "0"),
        };

        let major = major
            .parse::<u64>()
            .map_err(|_| CommitIdError::Malformed(s.to_string()))?;
        let minor = minor
            .parse::<u32>()
            .map_err(|_| CommitIdError::Malformed(s.to_string()))?;

        Self::new(major, minor)
    }
}

/// Errors that can occur with commit identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitIdError {
    /// Text is not a `major[.minor]` pair
    #[error("malformed commit id: {0:?}")]
    Malformed(String),
    /// Minor component exceeds two decimal digits
    #[error("commit id minor component out of range: {0}")]
    MinorOutOfRange(u32),
    /// Major component too large for an exact numeric form
    #[error("commit id major component out of range: {0}")]
    MajorOutOfRange(u64),
}

/// Metadata shared by every snapshot written in one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    /// Commit identifier
    pub id: CommitId,
    /// Author of the change
    pub author: String,
    /// When the commit was made
    pub commit_date: DateTime<Utc>,
    /// Application-defined commit properties
    pub properties: BTreeMap<String, String>,
}

impl CommitMetadata {
    /// Create commit metadata without properties.
    #[must_use]
    pub fn new(id: CommitId, author: impl Into<String>, commit_date: DateTime<Utc>) -> Self {
        Self {
            id,
            author: author.into(),
            commit_date,
            properties: BTreeMap::new(),
        }
    }

    /// Attach a commit property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Check that every given pair is present on this commit.
    #[must_use]
    pub fn has_all_properties(&self, wanted: &BTreeMap<String, String>) -> bool {
        wanted
            .iter()
            .all(|(key, value)| self.properties.get(key) == Some(value))
    }
}
