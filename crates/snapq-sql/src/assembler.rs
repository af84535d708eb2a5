//! Snapshot query assembly.
//!
//! Produces one executable statement from a base filter and query params:
//!
//! 1. Validate filter and params; ownership expansion applies when either
//!    the filter or the params ask for it
//! 2. Join snapshot, commit, identity and owner identity
//! 3. Add the base predicate
//! 4. AND every condition whose criterion is set
//! 5. Order newest commit first, then newest snapshot first
//! 6. Paginate with `LIMIT` / `OFFSET`
//!
//! The explicit ordering makes `skip` deterministic across invocations.

use crate::conditions::{Condition, ConditionContext, TextMatch};
use crate::error::QueryError;
use crate::filter::add_base_filter;
use crate::query::{SelectQuery, SnapshotQuery};
use crate::row::select_columns;
use crate::schema::{commit, global_id, snapshot, SchemaNames};
use snapq_core::{BaseFilter, JsonValueSerializer, QueryParams, ValueSerializer};
use std::sync::Arc;

/// Builds paginated snapshot queries for one schema configuration.
#[derive(Clone)]
pub struct SnapshotQueryAssembler {
    names: SchemaNames,
    text_match: TextMatch,
    serializer: Arc<dyn ValueSerializer>,
}

impl std::fmt::Debug for SnapshotQueryAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotQueryAssembler")
            .field("names", &self.names)
            .field("text_match", &self.text_match)
            .finish_non_exhaustive()
    }
}

impl SnapshotQueryAssembler {
    /// Create an assembler with structured text matching and JSON
    /// value serialization.
    #[must_use]
    pub fn new(names: SchemaNames) -> Self {
        Self {
            names,
            text_match: TextMatch::default(),
            serializer: Arc::new(JsonValueSerializer),
        }
    }

    /// Select the text matching mode.
    #[must_use]
    pub fn with_text_match(mut self, text_match: TextMatch) -> Self {
        self.text_match = text_match;
        self
    }

    /// Replace the value serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn ValueSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Configured relation names.
    #[must_use]
    pub fn names(&self) -> &SchemaNames {
        &self.names
    }

    /// Configured text matching mode.
    #[must_use]
    pub fn text_match(&self) -> TextMatch {
        self.text_match
    }

    /// Assemble the query for `filter` narrowed by `params`.
    ///
    /// # Errors
    ///
    /// Returns error if the filter or params are invalid, or a property
    /// value cannot be serialized. No query text is produced in that case.
    pub fn assemble(
        &self,
        filter: &BaseFilter,
        params: &QueryParams,
    ) -> Result<SnapshotQuery, QueryError> {
        params.validate()?;
        let filter = &filter.with_aggregate(params.is_aggregate());

        let mut query = SelectQuery::new(select_columns(), self.from_clause());
        add_base_filter(&self.names, filter, &mut query)?;

        let ctx = ConditionContext {
            names: &self.names,
            text_match: self.text_match,
            serializer: self.serializer.as_ref(),
        };
        let conditions = Condition::collect(params);
        for condition in &conditions {
            condition.apply(&ctx, &mut query)?;
        }

        query
            .order_by(format!("c.{} DESC, s.{} DESC", commit::PK, snapshot::PK))
            .limit(params.limit(), params.skip());

        let assembled = query.build()?;

        tracing::debug!(
            filter = %filter,
            conditions = conditions.len(),
            params = assembled.params.len(),
            limit = assembled.limit,
            skip = assembled.skip,
            "Assembled snapshot query"
        );

        Ok(assembled)
    }

    fn from_clause(&self) -> String {
        let global_ids = self.names.global_id_table();
        format!(
            "{snapshots} s \
             INNER JOIN {commits} c ON c.{commit_pk} = s.{commit_fk} \
             INNER JOIN {global_ids} g ON g.{gid_pk} = s.{gid_fk} \
             LEFT OUTER JOIN {global_ids} o ON o.{gid_pk} = g.{owner_fk}",
            snapshots = self.names.snapshot_table(),
            commits = self.names.commit_table(),
            commit_pk = commit::PK,
            commit_fk = snapshot::COMMIT_FK,
            gid_pk = global_id::PK,
            gid_fk = snapshot::GLOBAL_ID_FK,
            owner_fk = global_id::OWNER_ID_FK,
        )
    }
}
