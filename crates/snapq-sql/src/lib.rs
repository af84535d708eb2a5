//! # SnapQ SQL
//!
//! Composes snapshot filters into one parameterized SQL query.
//!
//! ## Query shape
//!
//! ```text
//! SELECT <snapshot, commit, identity, owner columns>
//! FROM snapshot s JOIN commit c JOIN global_id g LEFT JOIN global_id o
//! WHERE (<base filter>) AND (<condition>)...
//! ORDER BY c.commit_pk DESC, s.snapshot_pk DESC
//! LIMIT :limit OFFSET :skip
//! ```
//!
//! Caller data only ever reaches the statement as named parameters. Table
//! names come from [`SchemaNames`], which accepts plain identifiers only.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod conditions;
pub mod error;
pub mod filter;
pub mod query;
pub mod row;
pub mod schema;

pub use assembler::SnapshotQueryAssembler;
pub use conditions::{Condition, TextMatch};
pub use error::QueryError;
pub use query::{SelectQuery, SnapshotQuery, SqlValue};
pub use row::{RowError, SnapshotQueryExecutor, SnapshotRow};
pub use schema::SchemaNames;
