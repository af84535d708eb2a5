//! Query parameters for filtering snapshots.
//!
//! [`QueryParams`] is the contract every snapshot query obeys, whether it is
//! evaluated in memory or translated into SQL. It is built once through
//! [`QueryParamsBuilder`] and never mutated afterwards.
//!
//! "Not set" is represented by `None` for scalar criteria and by emptiness
//! for the commit-id and commit-property collections.

use crate::commit::CommitId;
use crate::filter::FilterError;
use crate::value::PropertyValue;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Default page size.
pub const DEFAULT_LIMIT: usize = 100;

/// Immutable snapshot filter criteria.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    limit: usize,
    skip: usize,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    commit_ids: BTreeSet<CommitId>,
    version: Option<u64>,
    author: Option<String>,
    commit_properties: BTreeMap<String, String>,
    aggregate: bool,
    new_object_changes: Option<bool>,
    changed_property: Option<String>,
    property_value: Option<(String, PropertyValue)>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            skip: 0,
            from: None,
            to: None,
            commit_ids: BTreeSet::new(),
            version: None,
            author: None,
            commit_properties: BTreeMap::new(),
            aggregate: false,
            new_object_changes: None,
            changed_property: None,
            property_value: None,
        }
    }
}

impl QueryParams {
    /// Start building query parameters.
    #[must_use]
    pub fn builder() -> QueryParamsBuilder {
        QueryParamsBuilder::default()
    }

    /// Maximum number of snapshots returned.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of latest snapshots skipped before `limit` applies.
    #[must_use]
    pub fn skip(&self) -> usize {
        self.skip
    }

    /// Inclusive lower bound on commit date.
    #[must_use]
    pub fn from(&self) -> Option<DateTime<Utc>> {
        self.from
    }

    /// Inclusive upper bound on commit date.
    #[must_use]
    pub fn to(&self) -> Option<DateTime<Utc>> {
        self.to
    }

    /// Exact-match commit ids; empty when not set.
    #[must_use]
    pub fn commit_ids(&self) -> &BTreeSet<CommitId> {
        &self.commit_ids
    }

    /// Exact-match snapshot version.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Exact-match commit author.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// Commit properties that must all be present; empty when not set.
    #[must_use]
    pub fn commit_properties(&self) -> &BTreeMap<String, String> {
        &self.commit_properties
    }

    /// When enabled, value objects owned by selected entities are included.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    /// `Some(false)` excludes snapshots of newly created objects.
    #[must_use]
    pub fn new_object_changes(&self) -> Option<bool> {
        self.new_object_changes
    }

    /// Check whether INITIAL snapshots must be excluded.
    #[must_use]
    pub fn skips_initial(&self) -> bool {
        self.new_object_changes == Some(false)
    }

    /// Property that must appear among a snapshot's changed properties.
    #[must_use]
    pub fn changed_property(&self) -> Option<&str> {
        self.changed_property.as_deref()
    }

    /// Property name of the property-value condition.
    #[must_use]
    pub fn property_value_name(&self) -> Option<&str> {
        self.property_value.as_ref().map(|(name, _)| name.as_str())
    }

    /// Value of the property-value condition.
    #[must_use]
    pub fn property_value(&self) -> Option<&PropertyValue> {
        self.property_value.as_ref().map(|(_, value)| value)
    }

    /// Check whether either date bound is present.
    #[must_use]
    pub fn has_dates(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Check whether `date` lies within the bounds, both ends inclusive.
    ///
    /// Compared at millisecond precision, the resolution commit dates are
    /// stored and bound at.
    #[must_use]
    pub fn is_date_in_range(&self, date: DateTime<Utc>) -> bool {
        let millis = date.timestamp_millis();
        if self.from.is_some_and(|from| millis < from.timestamp_millis()) {
            return false;
        }
        if self.to.is_some_and(|to| millis > to.timestamp_millis()) {
            return false;
        }
        true
    }

    /// Reject parameter combinations that cannot describe a sensible query.
    ///
    /// # Errors
    ///
    /// Returns error if the date range is inverted or the page size is zero.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.limit == 0 {
            return Err(FilterError::ZeroLimit);
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(FilterError::InvertedDateRange { from, to });
            }
        }
        Ok(())
    }
}

/// Fluent builder for [`QueryParams`].
#[derive(Debug, Clone, Default)]
pub struct QueryParamsBuilder {
    params: QueryParams,
}

impl QueryParamsBuilder {
    /// Limit the number of returned snapshots.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.params.limit = limit;
        self
    }

    /// Skip the given number of latest snapshots.
    #[must_use]
    pub fn skip(mut self, skip: usize) -> Self {
        self.params.skip = skip;
        self
    }

    /// Only snapshots committed at or after `from`.
    #[must_use]
    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.params.from = Some(from);
        self
    }

    /// Only snapshots committed at or before `to`.
    #[must_use]
    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.params.to = Some(to);
        self
    }

    /// Only snapshots written by the given commit. Repeatable.
    #[must_use]
    pub fn commit_id(mut self, commit_id: CommitId) -> Self {
        self.params.commit_ids.insert(commit_id);
        self
    }

    /// Only snapshots written by any of the given commits.
    #[must_use]
    pub fn commit_ids(mut self, commit_ids: impl IntoIterator<Item = CommitId>) -> Self {
        self.params.commit_ids.extend(commit_ids);
        self
    }

    /// Only snapshots with exactly this version.
    #[must_use]
    pub fn version(mut self, version: u64) -> Self {
        self.params.version = Some(version);
        self
    }

    /// Only snapshots committed by this author.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.params.author = Some(author.into());
        self
    }

    /// Require a commit property. Repeatable; all pairs must match.
    #[must_use]
    pub fn commit_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .commit_properties
            .insert(key.into(), value.into());
        self
    }

    /// Include value objects owned by the selected entities.
    #[must_use]
    pub fn aggregate(mut self, aggregate: bool) -> Self {
        self.params.aggregate = aggregate;
        self
    }

    /// Pass `false` to exclude snapshots of newly created objects.
    #[must_use]
    pub fn new_object_changes(mut self, new_object_changes: bool) -> Self {
        self.params.new_object_changes = Some(new_object_changes);
        self
    }

    /// Only snapshots where the given property changed.
    #[must_use]
    pub fn changed_property(mut self, name: impl Into<String>) -> Self {
        self.params.changed_property = Some(name.into());
        self
    }

    /// Only snapshots whose state holds `value` under `name`.
    #[must_use]
    pub fn property_value(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.params.property_value = Some((name.into(), value.into()));
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> QueryParams {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_dates_means_everything_in_range() {
        let params = QueryParams::default();
        assert!(!params.has_dates());
        for t in [day(1), day(15), DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC] {
            assert!(params.is_date_in_range(t));
        }
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let params = QueryParams::builder().from(day(2)).to(day(5)).build();

        assert!(params.has_dates());
        assert!(params.is_date_in_range(day(2)));
        assert!(params.is_date_in_range(day(5)));
        assert!(params.is_date_in_range(day(3)));
        assert!(!params.is_date_in_range(day(2) - Duration::milliseconds(1)));
        assert!(!params.is_date_in_range(day(5) + Duration::milliseconds(1)));
    }

    #[test]
    fn sub_millisecond_parts_are_ignored() {
        let commit_date = day(2) + Duration::microseconds(900);
        let to = day(2) + Duration::microseconds(500);
        let from = day(2) + Duration::microseconds(950);

        assert!(QueryParams::builder().to(to).build().is_date_in_range(commit_date));
        assert!(QueryParams::builder().from(from).build().is_date_in_range(commit_date));
        assert!(!QueryParams::builder()
            .to(day(2) - Duration::microseconds(1))
            .build()
            .is_date_in_range(commit_date));
    }

    #[test]
    fn single_bound() {
        let params = QueryParams::builder().to(day(5)).build();
        assert!(params.has_dates());
        assert!(params.is_date_in_range(day(1)));
        assert!(!params.is_date_in_range(day(6)));
    }

    #[test]
    fn collections_default_to_empty() {
        let params = QueryParams::builder().build();
        assert!(params.commit_ids().is_empty());
        assert!(params.commit_properties().is_empty());
        assert_eq!(params.limit(), DEFAULT_LIMIT);
        assert_eq!(params.skip(), 0);
        assert!(!params.skips_initial());
    }

    #[test]
    fn duplicate_commit_ids_collapse() {
        let params = QueryParams::builder()
            .commit_id(CommitId::major(3))
            .commit_ids([CommitId::major(3), CommitId::major(4)])
            .build();
        assert_eq!(params.commit_ids().len(), 2);
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let params = QueryParams::builder().from(day(5)).to(day(2)).build();
        assert!(matches!(
            params.validate(),
            Err(FilterError::InvertedDateRange { .. })
        ));

        let params = QueryParams::builder().from(day(2)).to(day(2)).build();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_limit() {
        let params = QueryParams::builder().limit(0).build();
        assert_eq!(params.validate(), Err(FilterError::ZeroLimit));
    }

    #[test]
    fn only_explicit_false_skips_initial() {
        assert!(QueryParams::builder()
            .new_object_changes(false)
            .build()
            .skips_initial());
        assert!(!QueryParams::builder()
            .new_object_changes(true)
            .build()
            .skips_initial());
    }
}
