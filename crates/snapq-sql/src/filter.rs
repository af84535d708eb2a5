//! SQL rendering of base filters.
//!
//! The query joins each snapshot `s` with its commit `c`, its identity `g`
//! and, through a left join, its owner's identity `o`. Base predicates are
//! written against those aliases.

use crate::error::QueryError;
use crate::query::SelectQuery;
use crate::schema::{global_id, snapshot, SchemaNames};
use snapq_core::{BaseFilter, GlobalId};
use std::collections::BTreeSet;

/// Append the base predicate of `filter` to `query`.
///
/// # Errors
///
/// Returns error if the filter has an empty managed type set.
pub fn add_base_filter(
    names: &SchemaNames,
    filter: &BaseFilter,
    query: &mut SelectQuery,
) -> Result<(), QueryError> {
    filter.validate()?;

    match filter {
        BaseFilter::ManagedTypes(types) => {
            let condition = managed_type_condition("s", types, query);
            query.and(condition);
        }
        BaseFilter::AggregateOwners(types) => {
            let condition = managed_type_condition("s", types, query);
            let owner_condition = managed_type_condition("s1", types, query);
            let snapshots = names.snapshot_table();
            // The owner qualifies through its most recent snapshot.
            query.and(format!(
                "{condition} OR g.{owner_fk} IN (\
                 SELECT s1.{gid_fk} FROM {snapshots} s1 \
                 WHERE {owner_condition} \
                 AND s1.{pk} = (SELECT MAX(s2.{pk}) FROM {snapshots} s2 \
                 WHERE s2.{gid_fk} = s1.{gid_fk}))",
                owner_fk = global_id::OWNER_ID_FK,
                gid_fk = snapshot::GLOBAL_ID_FK,
                pk = snapshot::PK,
            ));
        }
        BaseFilter::Instance {
            global_id,
            aggregate,
        } => {
            let instance = identity_condition(names, "g", "instance", global_id, query);
            if *aggregate {
                let owned = identity_condition(names, "o", "owner", global_id, query);
                query.and(format!("({instance}) OR ({owned})"));
            } else {
                query.and(instance);
            }
        }
        BaseFilter::AnyType => {}
    }

    Ok(())
}

/// `alias.managed_type IN (...)` with one bound parameter per type.
///
/// Parameter names are derived from the alias so the condition can appear
/// more than once in a statement.
fn managed_type_condition(alias: &str, types: &BTreeSet<String>, query: &mut SelectQuery) -> String {
    let mut placeholders = Vec::with_capacity(types.len());
    for (i, managed_type) in types.iter().enumerate() {
        let name = format!("{alias}_managed_type_{i}");
        placeholders.push(format!(":{name}"));
        query.with_argument(&name, managed_type.as_str());
    }
    format!(
        "{alias}.{} IN ({})",
        snapshot::MANAGED_TYPE,
        placeholders.join(", ")
    )
}

/// Null-safe match of the identity row `alias` against `id`.
fn identity_condition(
    names: &SchemaNames,
    alias: &str,
    prefix: &str,
    id: &GlobalId,
    query: &mut SelectQuery,
) -> String {
    query
        .with_argument(&format!("{prefix}_type_name"), id.type_name.as_str())
        .with_argument(&format!("{prefix}_local_id"), id.local_id.as_deref())
        .with_argument(&format!("{prefix}_fragment"), id.fragment.as_deref());

    let mut condition = format!(
        "{alias}.{type_name} = :{prefix}_type_name \
         AND {alias}.{local_id} IS :{prefix}_local_id \
         AND {alias}.{fragment} IS :{prefix}_fragment",
        type_name = global_id::TYPE_NAME,
        local_id = global_id::LOCAL_ID,
        fragment = global_id::FRAGMENT,
    );

    match id.owner() {
        None => condition.push_str(&format!(" AND {alias}.{} IS NULL", global_id::OWNER_ID_FK)),
        Some(owner) => {
            query
                .with_argument(&format!("{prefix}_owner_type_name"), owner.type_name.as_str())
                .with_argument(&format!("{prefix}_owner_local_id"), owner.local_id.as_deref());
            condition.push_str(&format!(
                " AND {alias}.{owner_fk} IN (SELECT {alias}_owner.{pk} FROM {table} {alias}_owner \
                 WHERE {alias}_owner.{type_name} = :{prefix}_owner_type_name \
                 AND {alias}_owner.{local_id} IS :{prefix}_owner_local_id)",
                owner_fk = global_id::OWNER_ID_FK,
                pk = global_id::PK,
                table = names.global_id_table(),
                type_name = global_id::TYPE_NAME,
                local_id = global_id::LOCAL_ID,
            ));
        }
    }

    condition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SqlValue;
    use snapq_core::FilterError;

    fn render(filter: &BaseFilter) -> Result<crate::query::SnapshotQuery, QueryError> {
        let mut query = SelectQuery::new("*", "t");
        add_base_filter(&SchemaNames::default(), filter, &mut query)?;
        query.build()
    }

    #[test]
    fn managed_types_bind_each_type() {
        let filter = BaseFilter::managed_types(["Person", "Company"], false).unwrap();
        let built = render(&filter).unwrap();

        assert_eq!(
            built.sql,
            "SELECT * FROM t WHERE (s.snapshot_managed_type IN (:s_managed_type_0, :s_managed_type_1))"
        );
        // BTreeSet order
        assert_eq!(
            built.param("s_managed_type_0"),
            Some(&SqlValue::Text("Company".to_string()))
        );
    }

    #[test]
    fn aggregate_adds_owner_subquery() {
        let filter = BaseFilter::managed_types(["Person"], true).unwrap();
        let built = render(&filter).unwrap();

        assert!(built.sql.contains("OR g.owner_id_fk IN (SELECT s1.snapshot_global_id_fk"));
        assert!(built.sql.contains("s1.snapshot_managed_type IN (:s1_managed_type_0)"));
        assert!(built.sql.contains("SELECT MAX(s2.snapshot_pk)"));
        assert_eq!(built.params.len(), 2);
    }

    #[test]
    fn instance_of_entity_requires_no_owner() {
        let filter = BaseFilter::instance(GlobalId::instance("Person", "1"), false);
        let built = render(&filter).unwrap();

        assert!(built.sql.contains("g.owner_id_fk IS NULL"));
        assert_eq!(built.param("instance_fragment"), Some(&SqlValue::Null));
        assert_eq!(
            built.param("instance_local_id"),
            Some(&SqlValue::Text("1".to_string()))
        );
    }

    #[test]
    fn instance_aggregate_matches_owner_alias() {
        let filter = BaseFilter::instance(GlobalId::instance("Person", "1"), true);
        let built = render(&filter).unwrap();
        assert!(built.sql.contains("o.type_name = :owner_type_name"));
    }

    #[test]
    fn value_object_instance_matches_through_owner() {
        let owner = GlobalId::instance("Person", "1");
        let filter = BaseFilter::instance(GlobalId::value_object("Address", owner, "address"), false);
        let built = render(&filter).unwrap();

        assert!(built.sql.contains("FROM snapq_global_id g_owner"));
        assert_eq!(
            built.param("instance_owner_type_name"),
            Some(&SqlValue::Text("Person".to_string()))
        );
    }

    #[test]
    fn any_type_adds_nothing() {
        let built = render(&BaseFilter::AnyType).unwrap();
        assert_eq!(built.sql, "SELECT * FROM t");
    }

    #[test]
    fn empty_types_never_render_in_list() {
        let filter = BaseFilter::AggregateOwners(BTreeSet::new());
        assert_eq!(
            render(&filter),
            Err(QueryError::InvalidFilter(FilterError::EmptyManagedTypes))
        );
    }
}
