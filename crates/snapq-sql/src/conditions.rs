//! Optional snapshot conditions.
//!
//! Each criterion of [`QueryParams`] maps to one [`Condition`]. A condition
//! is present only when its criterion is set; present conditions are ANDed
//! onto the base filter in any order.
//!
//! # Conditions
//!
//! | Condition | Present when | Fragment |
//! |-----------|--------------|----------|
//! | SkipInitial | `new_object_changes == Some(false)` | `snapshot_type <> 'INITIAL'` |
//! | ChangedProperty | `changed_property` set | name is in the changed-property list |
//! | PropertyValue | `property_value` set | state field equals the serialized value |
//! | FromDate / ToDate | `from` / `to` set | inclusive commit date bound |
//! | CommitIds | `commit_ids` non-empty | numeric commit id in set |
//! | Version | `version` set | exact version |
//! | Author | `author` set | exact author |
//! | CommitProperties | `commit_properties` non-empty | one `EXISTS` per pair |
//!
//! Every caller-supplied value is a bound parameter.

use crate::error::QueryError;
use crate::query::{to_i64, SelectQuery};
use crate::schema::{commit, commit_property, snapshot, SchemaNames};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapq_core::{CommitId, PropertyValue, QueryParams, SnapshotType, ValueSerializer};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// How text criteria are matched against serialized snapshot columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextMatch {
    /// JSON-aware membership and equality
    #[default]
    Structured,
    /// `LIKE` containment over the raw text.
    ///
    /// Known limitation: a name or value that occurs inside a longer one
    /// also matches, and property values are looked up in the legacy
    /// `"name: value"` encoding rather than the JSON object form.
    Substring,
}

impl FromStr for TextMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured" => Ok(TextMatch::Structured),
            "substring" => Ok(TextMatch::Substring),
            other => Err(format!("unknown text match mode: {other}")),
        }
    }
}

/// Shared inputs for rendering conditions.
pub struct ConditionContext<'a> {
    /// Relation names
    pub names: &'a SchemaNames,
    /// Text matching mode
    pub text_match: TextMatch,
    /// Encodes property values
    pub serializer: &'a dyn ValueSerializer,
}

/// One optional criterion of a snapshot query.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition<'a> {
    /// Exclude INITIAL snapshots
    SkipInitial,
    /// Changed-property membership
    ChangedProperty(&'a str),
    /// State field equality
    PropertyValue {
        /// Field name
        name: &'a str,
        /// Expected value
        value: &'a PropertyValue,
    },
    /// Commit date lower bound, inclusive
    FromDate(DateTime<Utc>),
    /// Commit date upper bound, inclusive
    ToDate(DateTime<Utc>),
    /// Commit id set
    CommitIds(&'a BTreeSet<CommitId>),
    /// Exact snapshot version
    Version(u64),
    /// Exact commit author
    Author(&'a str),
    /// Every commit property pair
    CommitProperties(&'a BTreeMap<String, String>),
}

impl<'a> Condition<'a> {
    /// Collect the conditions whose criteria are set in `params`.
    #[must_use]
    pub fn collect(params: &'a QueryParams) -> Vec<Self> {
        let mut conditions = Vec::new();

        if params.skips_initial() {
            conditions.push(Condition::SkipInitial);
        }
        if let Some(name) = params.changed_property() {
            conditions.push(Condition::ChangedProperty(name));
        }
        if let (Some(name), Some(value)) = (params.property_value_name(), params.property_value())
        {
            conditions.push(Condition::PropertyValue { name, value });
        }
        if let Some(from) = params.from() {
            conditions.push(Condition::FromDate(from));
        }
        if let Some(to) = params.to() {
            conditions.push(Condition::ToDate(to));
        }
        if !params.commit_ids().is_empty() {
            conditions.push(Condition::CommitIds(params.commit_ids()));
        }
        if let Some(version) = params.version() {
            conditions.push(Condition::Version(version));
        }
        if let Some(author) = params.author() {
            conditions.push(Condition::Author(author));
        }
        if !params.commit_properties().is_empty() {
            conditions.push(Condition::CommitProperties(params.commit_properties()));
        }

        conditions
    }

    /// Append this condition's fragment and bindings to `query`.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be serialized or bound.
    pub fn apply(&self, ctx: &ConditionContext<'_>, query: &mut SelectQuery) -> Result<(), QueryError> {
        match self {
            Condition::SkipInitial => {
                query
                    .and(format!("s.{} <> :snapshot_type", snapshot::TYPE))
                    .with_argument("snapshot_type", SnapshotType::Initial.as_str());
            }
            Condition::ChangedProperty(name) => add_changed_property(ctx, query, name),
            Condition::PropertyValue { name, value } => {
                add_property_value(ctx, query, name, value)?;
            }
            Condition::FromDate(from) => {
                query
                    .and(format!("c.{} >= :commit_from_date", commit::DATE))
                    .with_argument("commit_from_date", from.timestamp_millis());
            }
            Condition::ToDate(to) => {
                query
                    .and(format!("c.{} <= :commit_to_date", commit::DATE))
                    .with_argument("commit_to_date", to.timestamp_millis());
            }
            Condition::CommitIds(ids) => {
                let placeholders: Vec<String> =
                    (0..ids.len()).map(|i| format!(":commit_id_{i}")).collect();
                query.and(format!("c.{} IN ({})", commit::ID, placeholders.join(", ")));
                for (i, id) in ids.iter().enumerate() {
                    id.validate()?;
                    query.with_argument(&format!("commit_id_{i}"), id.value_as_number());
                }
            }
            Condition::Version(version) => {
                query
                    .and(format!("s.{} = :version", snapshot::VERSION))
                    .with_argument("version", to_i64("version", *version)?);
            }
            Condition::Author(author) => {
                query
                    .and(format!("c.{} = :author", commit::AUTHOR))
                    .with_argument("author", *author);
            }
            Condition::CommitProperties(properties) => {
                let table = ctx.names.commit_property_table();
                for (i, (name, value)) in properties.iter().enumerate() {
                    query
                        .and(format!(
                            "EXISTS (SELECT 1 FROM {table} cp WHERE cp.{fk} = c.{pk} \
                             AND cp.{name_col} = :commit_property_name_{i} \
                             AND cp.{value_col} = :commit_property_value_{i})",
                            fk = commit_property::COMMIT_FK,
                            pk = commit::PK,
                            name_col = commit_property::NAME,
                            value_col = commit_property::VALUE,
                        ))
                        .with_argument(&format!("commit_property_name_{i}"), name.as_str())
                        .with_argument(&format!("commit_property_value_{i}"), value.as_str());
                }
            }
        }
        Ok(())
    }
}

fn add_changed_property(ctx: &ConditionContext<'_>, query: &mut SelectQuery, name: &str) {
    match ctx.text_match {
        TextMatch::Structured => {
            query
                .and(format!(
                    "EXISTS (SELECT 1 FROM json_each(s.{}) WHERE json_each.value = :changed_property)",
                    snapshot::CHANGED
                ))
                .with_argument("changed_property", name);
        }
        TextMatch::Substring => {
            query
                .and(format!(
                    "s.{} LIKE :changed_property ESCAPE '\\'",
                    snapshot::CHANGED
                ))
                .with_argument(
                    "changed_property",
                    format!("%\"{}\"%", escape_like(name)),
                );
        }
    }
}

fn add_property_value(
    ctx: &ConditionContext<'_>,
    query: &mut SelectQuery,
    name: &str,
    value: &PropertyValue,
) -> Result<(), QueryError> {
    let serialized = ctx.serializer.serialize(value)?;

    match ctx.text_match {
        TextMatch::Structured => {
            if name.contains('"') || name.contains('\\') {
                return Err(QueryError::UnsupportedPropertyName(name.to_string()));
            }
            // Types must agree so that 1, 1.0 and true stay distinct; JSON
            // null compares by type alone.
            query
                .and(format!(
                    "json_type(s.{state}, :property_path) = json_type(:property_value) \
                     AND (json_type(:property_value) = 'null' \
                     OR json_extract(s.{state}, :property_path) = json_extract(:property_value, '$'))",
                    state = snapshot::STATE
                ))
                .with_argument("property_path", format!("$.\"{name}\""))
                .with_argument("property_value", serialized);
        }
        TextMatch::Substring => {
            query
                .and(format!(
                    "s.{} LIKE :property_value ESCAPE '\\'",
                    snapshot::STATE
                ))
                .with_argument(
                    "property_value",
                    format!(
                        "%\"{}: {}\"%",
                        escape_like(name),
                        escape_like(&serialized)
                    ),
                );
        }
    }
    Ok(())
}

/// Escape `LIKE` wildcards so caller text matches literally.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
