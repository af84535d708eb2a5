//! Base selection filters.
//!
//! Every snapshot query starts from one base filter, then narrows it with
//! the optional criteria in [`QueryParams`](crate::QueryParams).
//!
//! # Variants
//!
//! | Variant | Selects |
//! |---------|---------|
//! | `ManagedTypes` | snapshots whose managed type is in the set |
//! | `AggregateOwners` | the above, plus value objects whose owner's current type is in the set |
//! | `Instance` | snapshots of one object, optionally plus the value objects it owns |
//! | `AnyType` | every snapshot |

use crate::snapshot::GlobalId;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;

/// Primary selection predicate of a snapshot query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseFilter {
    /// Snapshots of the given managed types
    ManagedTypes(BTreeSet<String>),
    /// Snapshots of the given managed types and of the value objects they own
    AggregateOwners(BTreeSet<String>),
    /// Snapshots of one object
    Instance {
        /// Selected object
        global_id: GlobalId,
        /// Also select value objects owned by it
        aggregate: bool,
    },
    /// No type restriction
    AnyType,
}

impl BaseFilter {
    /// Filter by managed type names, expanding to owned value objects when
    /// `aggregate` is set.
    ///
    /// # Errors
    ///
    /// Returns error if `types` is empty.
    pub fn managed_types<I, S>(types: I, aggregate: bool) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types: BTreeSet<String> = types.into_iter().map(Into::into).collect();
        let filter = if aggregate {
            BaseFilter::AggregateOwners(types)
        } else {
            BaseFilter::ManagedTypes(types)
        };
        filter.validate()?;
        Ok(filter)
    }

    /// Filter by one object identity.
    #[must_use]
    pub fn instance(global_id: GlobalId, aggregate: bool) -> Self {
        BaseFilter::Instance {
            global_id,
            aggregate,
        }
    }

    /// Check the filter can be rendered without matching nothing by accident.
    ///
    /// # Errors
    ///
    /// Returns error if a type-set variant has no types.
    pub fn validate(&self) -> Result<(), FilterError> {
        match self {
            BaseFilter::ManagedTypes(types) | BaseFilter::AggregateOwners(types)
                if types.is_empty() =>
            {
                Err(FilterError::EmptyManagedTypes)
            }
            _ => Ok(()),
        }
    }

    /// Check whether the filter expands to owned value objects.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        match self {
            BaseFilter::AggregateOwners(_) => true,
            BaseFilter::Instance { aggregate, .. } => *aggregate,
            BaseFilter::ManagedTypes(_) | BaseFilter::AnyType => false,
        }
    }
}

impl BaseFilter {
    /// Filter with ownership expansion switched on when `aggregate` is set.
    ///
    /// Expansion requested by either the filter or the query params applies;
    /// `AnyType` already selects owned value objects.
    #[must_use]
    pub fn with_aggregate(&self, aggregate: bool) -> BaseFilter {
        match self {
            BaseFilter::ManagedTypes(types) if aggregate => {
                BaseFilter::AggregateOwners(types.clone())
            }
            BaseFilter::Instance {
                global_id,
                aggregate: own,
            } => BaseFilter::Instance {
                global_id: global_id.clone(),
                aggregate: *own || aggregate,
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for BaseFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseFilter::ManagedTypes(types) => write!(f, "types{types:?}"),
            BaseFilter::AggregateOwners(types) => write!(f, "aggregate{types:?}"),
            BaseFilter::Instance {
                global_id,
                aggregate: false,
            } => write!(f, "instance({global_id})"),
            BaseFilter::Instance {
                global_id,
                aggregate: true,
            } => write!(f, "aggregate({global_id})"),
            BaseFilter::AnyType => write!(f, "any"),
        }
    }
}

/// A filter or its parameters cannot describe a valid query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// Type-set filter with no types
    #[error("managed type set must not be empty")]
    EmptyManagedTypes,
    /// `from` is later than `to`
    #[error("date range is inverted: from {from} is after to {to}")]
    InvertedDateRange {
        /// Lower bound
        from: DateTime<Utc>,
        /// Upper bound
        to: DateTime<Utc>,
    },
    /// Page size of zero
    #[error("limit must be positive")]
    ZeroLimit,
}
