//! Query artifacts handed to the storage execution collaborator.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL `NULL`
    Null,
    /// 64-bit integer
    Integer(i64),
    /// 64-bit float
    Real(f64),
    /// Text
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// An executable, paginated snapshot query.
///
/// `sql` uses named parameters (`:name`); `params` holds every binding in
/// the order it was added, each name including its `:` prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotQuery {
    /// Statement text
    pub sql: String,
    /// Named parameter bindings
    pub params: Vec<(String, SqlValue)>,
    /// Page size
    pub limit: usize,
    /// Rows skipped before the page
    pub skip: usize,
}

impl SnapshotQuery {
    /// Look up a bound parameter by name, with or without the `:` prefix.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&SqlValue> {
        let name = name.strip_prefix(':').unwrap_or(name);
        self.params
            .iter()
            .find(|(n, _)| n.strip_prefix(':') == Some(name))
            .map(|(_, v)| v)
    }
}

impl fmt::Display for SnapshotQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.sql)?;
        for (name, value) in &self.params {
            writeln!(f, "  {name} = {value:?}")?;
        }
        Ok(())
    }
}

/// Incremental `SELECT` builder.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    select: String,
    from: String,
    conditions: Vec<String>,
    order_by: Option<String>,
    page: Option<(usize, usize)>,
    params: Vec<(String, SqlValue)>,
}

impl SelectQuery {
    /// Start a query with the given column list and source.
    #[must_use]
    pub fn new(select: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            select: select.into(),
            from: from.into(),
            ..Self::default()
        }
    }

    /// Add a conjunctive condition.
    pub fn and(&mut self, condition: impl Into<String>) -> &mut Self {
        self.conditions.push(condition.into());
        self
    }

    /// Bind a named argument. `name` is given without the `:` prefix.
    pub fn with_argument(&mut self, name: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.params.push((format!(":{name}"), value.into()));
        self
    }

    /// Set the ordering clause.
    pub fn order_by(&mut self, order_by: impl Into<String>) -> &mut Self {
        self.order_by = Some(order_by.into());
        self
    }

    /// Paginate the result.
    pub fn limit(&mut self, limit: usize, skip: usize) -> &mut Self {
        self.page = Some((limit, skip));
        self
    }

    /// Number of conditions added so far.
    #[must_use]
    pub fn condition_count(&self) -> usize {
        self.conditions.len()
    }

    /// Render the final statement.
    ///
    /// # Errors
    ///
    /// Returns error if the page bounds exceed the store's integer range.
    pub fn build(mut self) -> Result<SnapshotQuery, QueryError> {
        let mut sql = format!("SELECT {} FROM {}", self.select, self.from);

        if !self.conditions.is_empty() {
            let clauses: Vec<String> = self.conditions.iter().map(|c| format!("({c})")).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if let Some(order_by) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }

        let (limit, skip) = self.page.unwrap_or((usize::MAX, 0));
        if self.page.is_some() {
            sql.push_str(" LIMIT :limit OFFSET :skip");
            let limit_i64 = to_i64("limit", limit)?;
            let skip_i64 = to_i64("skip", skip)?;
            self.with_argument("limit", limit_i64);
            self.with_argument("skip", skip_i64);
        }

        Ok(SnapshotQuery {
            sql,
            params: self.params,
            limit,
            skip,
        })
    }
}

/// Convert a count into the store's integer type.
pub(crate) fn to_i64<T>(what: &'static str, value: T) -> Result<i64, QueryError>
where
    T: Copy + TryInto<i64> + TryInto<u64>,
{
    TryInto::<i64>::try_into(value).map_err(|_| QueryError::ValueOutOfRange {
        what,
        value: TryInto::<u64>::try_into(value).unwrap_or(u64::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_conditions_order_and_page() {
        let mut query = SelectQuery::new("a, b", "t");
        query
            .and("a = :a")
            .with_argument("a", 1_i64)
            .and("b <> :b OR b IS NULL")
            .with_argument("b", "x")
            .order_by("a DESC")
            .limit(10, 20);
        assert_eq!(query.condition_count(), 2);

        let built = query.build().unwrap();
        assert_eq!(
            built.sql,
            "SELECT a, b FROM t WHERE (a = :a) AND (b <> :b OR b IS NULL) \
             ORDER BY a DESC LIMIT :limit OFFSET :skip"
        );
        assert_eq!(built.param("a"), Some(&SqlValue::Integer(1)));
        assert_eq!(built.param(":b"), Some(&SqlValue::Text("x".to_string())));
        assert_eq!(built.param("limit"), Some(&SqlValue::Integer(10)));
        assert_eq!(built.param("skip"), Some(&SqlValue::Integer(20)));
        assert_eq!((built.limit, built.skip), (10, 20));
    }

    #[test]
    fn no_conditions_no_where() {
        let built = SelectQuery::new("*", "t").build().unwrap();
        assert_eq!(built.sql, "SELECT * FROM t");
        assert!(built.params.is_empty());
    }

    #[test]
    fn oversized_page_is_rejected() {
        let mut query = SelectQuery::new("*", "t");
        query.limit(usize::MAX, 0);
        assert!(matches!(
            query.build(),
            Err(QueryError::ValueOutOfRange { what: "limit", .. })
        ));
    }

    #[test]
    fn optional_values_bind_null() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(
            SqlValue::from(Some("x")),
            SqlValue::Text("x".to_string())
        );
    }
}
