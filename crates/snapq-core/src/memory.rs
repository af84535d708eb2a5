//! In-memory snapshot repository.
//!
//! Append-only store of snapshots that evaluates [`BaseFilter`] and
//! [`QueryParams`] directly against loaded snapshots. Text criteria are
//! typed predicates here: changed properties are tested by set membership
//! and property values by JSON equality on the state map.
//!
//! Results are ordered newest commit first, then newest snapshot first
//! within a commit, before `skip` and `limit` apply.

use crate::filter::{BaseFilter, FilterError};
use crate::params::QueryParams;
use crate::snapshot::{CdoSnapshot, GlobalId};
use crate::value::SerializationError;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct StoredSnapshot {
    commit_seq: u64,
    snapshot: CdoSnapshot,
}

/// Append-only, in-memory snapshot store.
#[derive(Debug, Default)]
pub struct InMemorySnapshotRepository {
    /// Snapshots in insertion order
    snapshots: Vec<StoredSnapshot>,
    /// Index of the latest snapshot per object
    latest: HashMap<GlobalId, usize>,
    next_commit_seq: u64,
}

impl InMemorySnapshotRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the snapshots written by one commit.
    ///
    /// # Errors
    ///
    /// Returns error if a snapshot's version does not advance past the
    /// latest stored version of the same object.
    pub fn persist(&mut self, snapshots: Vec<CdoSnapshot>) -> Result<(), RepositoryError> {
        // Versions must also advance within the batch itself
        {
            let mut batch_latest: HashMap<&GlobalId, u64> = HashMap::new();
            for snapshot in &snapshots {
                let latest = match batch_latest.get(&snapshot.global_id) {
                    Some(&version) => version,
                    None => self.latest(&snapshot.global_id).map_or(0, |s| s.version),
                };
                if snapshot.version <= latest {
                    return Err(RepositoryError::VersionConflict {
                        global_id: snapshot.global_id.to_string(),
                        latest,
                        attempted: snapshot.version,
                    });
                }
                batch_latest.insert(&snapshot.global_id, snapshot.version);
            }
        }

        let commit_seq = self.next_commit_seq;
        self.next_commit_seq += 1;

        let count = snapshots.len();
        for snapshot in snapshots {
            self.latest
                .insert(snapshot.global_id.clone(), self.snapshots.len());
            self.snapshots.push(StoredSnapshot {
                commit_seq,
                snapshot,
            });
        }

        tracing::debug!(commit_seq, snapshots = count, "Persisted commit");
        Ok(())
    }

    /// Get the most recent snapshot of an object.
    #[must_use]
    pub fn latest(&self, global_id: &GlobalId) -> Option<&CdoSnapshot> {
        self.latest
            .get(global_id)
            .map(|&idx| &self.snapshots[idx].snapshot)
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check if the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Find snapshots matching `filter` and `params`, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the filter or parameters are invalid, or the
    /// property value cannot be serialized.
    pub fn find(
        &self,
        filter: &BaseFilter,
        params: &QueryParams,
    ) -> Result<Vec<CdoSnapshot>, RepositoryError> {
        let filter = &filter.with_aggregate(params.is_aggregate());
        filter.validate()?;
        params.validate()?;

        let expected_value = match params.property_value() {
            Some(value) => Some(value.to_json()?),
            None => None,
        };

        // Insertion order is commit order, so reverse iteration is newest
        // commit first and newest snapshot first within a commit.
        let results: Vec<CdoSnapshot> = self
            .snapshots
            .iter()
            .rev()
            .filter(|stored| self.matches_base(filter, &stored.snapshot))
            .filter(|stored| matches_params(params, expected_value.as_ref(), &stored.snapshot))
            .skip(params.skip())
            .take(params.limit())
            .map(|stored| stored.snapshot.clone())
            .collect();

        tracing::debug!(
            filter = %filter,
            matched = results.len(),
            newest_commit_seq = self.snapshots.last().map(|s| s.commit_seq),
            "Evaluated in-memory snapshot query"
        );

        Ok(results)
    }

    fn matches_base(&self, filter: &BaseFilter, snapshot: &CdoSnapshot) -> bool {
        match filter {
            BaseFilter::ManagedTypes(types) => types.contains(&snapshot.managed_type),
            BaseFilter::AggregateOwners(types) => {
                types.contains(&snapshot.managed_type)
                    || snapshot
                        .global_id
                        .owner()
                        .and_then(|owner| self.latest(owner))
                        .is_some_and(|owner| types.contains(&owner.managed_type))
            }
            BaseFilter::Instance {
                global_id,
                aggregate,
            } => {
                snapshot.global_id == *global_id
                    || (*aggregate && snapshot.global_id.is_owned_by(global_id))
            }
            BaseFilter::AnyType => true,
        }
    }
}

fn matches_params(
    params: &QueryParams,
    expected_value: Option<&Value>,
    snapshot: &CdoSnapshot,
) -> bool {
    if params.skips_initial() && snapshot.is_initial() {
        return false;
    }
    if let Some(name) = params.changed_property() {
        if !snapshot.has_changed_property(name) {
            return false;
        }
    }
    if let (Some(name), Some(expected)) = (params.property_value_name(), expected_value) {
        if snapshot.property_value(name) != Some(expected) {
            return false;
        }
    }
    if !params.is_date_in_range(snapshot.commit.commit_date) {
        return false;
    }
    if !params.commit_ids().is_empty() && !params.commit_ids().contains(&snapshot.commit.id) {
        return false;
    }
    if params.version().is_some_and(|v| v != snapshot.version) {
        return false;
    }
    if params.author().is_some_and(|a| a != snapshot.commit.author) {
        return false;
    }
    snapshot.commit.has_all_properties(params.commit_properties())
}

/// Errors raised by the in-memory repository.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    /// Invalid filter or parameters
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),
    /// Property value could not be encoded
    #[error("serialization failure: {0}")]
    Serialization(#[from] SerializationError),
    /// Snapshot version does not advance
    #[error("version conflict for {global_id}: latest {latest}, attempted {attempted}")]
    VersionConflict {
        /// Object identity
        global_id: String,
        /// Latest stored version
        latest: u64,
        /// Rejected version
        attempted: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{CommitId, CommitMetadata};
    use crate::snapshot::SnapshotType;
    use crate::value::PropertyValue;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::{json, Map};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
    }

    fn commit(major: u64, author: &str, day: u32) -> CommitMetadata {
        CommitMetadata::new(CommitId::major(major), author, at(day))
    }

    fn snap(
        global_id: &GlobalId,
        version: u64,
        state: Value,
        changed: &[&str],
        commit: &CommitMetadata,
    ) -> CdoSnapshot {
        let state: Map<String, Value> = match state {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        CdoSnapshot {
            global_id: global_id.clone(),
            managed_type: global_id.type_name.clone(),
            state,
            version,
            snapshot_type: if version == 1 {
                SnapshotType::Initial
            } else {
                SnapshotType::Update
            },
            changed_properties: changed.iter().map(ToString::to_string).collect(),
            commit: commit.clone(),
        }
    }

    fn person() -> GlobalId {
        GlobalId::instance("Person", "bob")
    }

    fn address() -> GlobalId {
        GlobalId::value_object("Address", person(), "address")
    }

    fn seeded() -> InMemorySnapshotRepository {
        let mut repo = InMemorySnapshotRepository::new();
        let c1 = commit(1, "kate", 1).with_property("dept", "IT");
        repo.persist(vec![
            snap(&person(), 1, json!({"name": "Bob", "age": 30}), &[], &c1),
            snap(&address(), 1, json!({"city": "London"}), &[], &c1),
        ])
        .unwrap();

        let c2 = commit(2, "john", 5)
            .with_property("dept", "IT")
            .with_property("region", "EU");
        repo.persist(vec![
            snap(&person(), 2, json!({"name": "Bob", "age": 31}), &["age"], &c2),
            snap(&address(), 2, json!({"city": "Paris"}), &["city"], &c2),
        ])
        .unwrap();
        repo
    }

    #[test]
    fn aggregate_expansion_includes_owned_value_objects() {
        let repo = seeded();
        let params = QueryParams::default();

        let plain = repo
            .find(&BaseFilter::managed_types(["Person"], false).unwrap(), &params)
            .unwrap();
        assert_eq!(plain.len(), 2);
        assert!(plain.iter().all(|s| s.global_id == person()));

        let agg = repo
            .find(&BaseFilter::managed_types(["Person"], true).unwrap(), &params)
            .unwrap();
        assert_eq!(agg.len(), 4);
        assert!(agg.iter().any(|s| s.global_id == address()));
    }

    #[test]
    fn instance_filter_with_aggregate() {
        let repo = seeded();
        let params = QueryParams::default();

        let only = repo
            .find(&BaseFilter::instance(person(), false), &params)
            .unwrap();
        assert_eq!(only.len(), 2);

        let with_owned = repo
            .find(&BaseFilter::instance(person(), true), &params)
            .unwrap();
        assert_eq!(with_owned.len(), 4);
    }

    #[test]
    fn results_are_newest_first() {
        let repo = seeded();
        let found = repo
            .find(&BaseFilter::AnyType, &QueryParams::default())
            .unwrap();
        let versions: Vec<u64> = found.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![2, 2, 1, 1]);
        assert_eq!(found[0].global_id, address());
    }

    #[test]
    fn commit_properties_require_all_pairs() {
        let repo = seeded();
        let params = QueryParams::builder()
            .commit_property("dept", "IT")
            .commit_property("region", "EU")
            .build();
        let found = repo.find(&BaseFilter::AnyType, &params).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|s| s.commit.id == CommitId::major(2)));
    }

    #[test]
    fn skip_initial_and_changed_property() {
        let repo = seeded();

        let params = QueryParams::builder().new_object_changes(false).build();
        let found = repo.find(&BaseFilter::AnyType, &params).unwrap();
        assert!(found.iter().all(|s| !s.is_initial()));
        assert_eq!(found.len(), 2);

        let params = QueryParams::builder().changed_property("city").build();
        let found = repo.find(&BaseFilter::AnyType, &params).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].global_id, address());
    }

    #[test]
    fn property_value_is_exact_json_equality() {
        let repo = seeded();

        let params = QueryParams::builder().property_value("age", 31).build();
        let found = repo.find(&BaseFilter::AnyType, &params).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version, 2);

        // "Lond" is a substring of the stored value but not equal to it
        let params = QueryParams::builder().property_value("city", "Lond").build();
        assert!(repo.find(&BaseFilter::AnyType, &params).unwrap().is_empty());

        let params = QueryParams::builder()
            .property_value("age", PropertyValue::Float(f64::INFINITY))
            .build();
        assert!(matches!(
            repo.find(&BaseFilter::AnyType, &params),
            Err(RepositoryError::Serialization(_))
        ));
    }

    #[test]
    fn date_author_version_and_commit_id() {
        let repo = seeded();

        let params = QueryParams::builder().from(at(5)).to(at(5)).build();
        assert_eq!(repo.find(&BaseFilter::AnyType, &params).unwrap().len(), 2);

        let params = QueryParams::builder().author("Kate").build();
        assert!(repo.find(&BaseFilter::AnyType, &params).unwrap().is_empty());

        let params = QueryParams::builder().version(1).build();
        let found = repo.find(&BaseFilter::AnyType, &params).unwrap();
        assert!(found.iter().all(|s| s.version == 1));

        let params = QueryParams::builder().commit_id(CommitId::major(1)).build();
        assert_eq!(repo.find(&BaseFilter::AnyType, &params).unwrap().len(), 2);
    }

    #[test]
    fn version_must_advance() {
        let mut repo = seeded();
        let err = repo
            .persist(vec![snap(&person(), 2, json!({}), &[], &commit(3, "kate", 6))])
            .unwrap_err();
        assert!(matches!(err, RepositoryError::VersionConflict { latest: 2, .. }));
    }

    #[test]
    fn duplicate_version_in_one_batch_is_rejected() {
        let mut repo = InMemorySnapshotRepository::new();
        let c1 = commit(1, "kate", 1);
        let err = repo
            .persist(vec![
                snap(&person(), 1, json!({}), &[], &c1),
                snap(&person(), 1, json!({}), &[], &c1),
            ])
            .unwrap_err();

        assert_eq!(
            err,
            RepositoryError::VersionConflict {
                global_id: "Person/bob".to_string(),
                latest: 1,
                attempted: 1,
            }
        );
        assert!(repo.is_empty());
    }

    #[test]
    fn params_aggregate_expands_type_filter() {
        let repo = seeded();
        let params = QueryParams::builder().aggregate(true).build();

        let found = repo
            .find(&BaseFilter::managed_types(["Person"], false).unwrap(), &params)
            .unwrap();
        assert_eq!(found.len(), 4);
        assert!(found.iter().any(|s| s.global_id == address()));
    }

    #[test]
    fn owner_qualifies_through_its_latest_snapshot() {
        let mut repo = seeded();
        let mut promoted = snap(&person(), 3, json!({"name": "Bob"}), &[], &commit(3, "kate", 7));
        promoted.managed_type = "Employee".to_string();
        repo.persist(vec![promoted]).unwrap();

        let found = repo
            .find(
                &BaseFilter::managed_types(["Person"], true).unwrap(),
                &QueryParams::default(),
            )
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|s| s.global_id == person()));
        assert!(found.iter().all(|s| s.managed_type == "Person"));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let repo = seeded();
        let params = QueryParams::builder().from(at(9)).to(at(1)).build();
        assert!(matches!(
            repo.find(&BaseFilter::AnyType, &params),
            Err(RepositoryError::InvalidFilter(FilterError::InvertedDateRange { .. }))
        ));
    }
}
