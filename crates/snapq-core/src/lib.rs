//! # SnapQ Core
//!
//! Snapshot model and filter contract for querying an append-only audit store.
//!
//! This crate provides:
//! - Commit and snapshot model (`CommitId`, `GlobalId`, `CdoSnapshot`)
//! - `QueryParams`, the immutable filter contract every query obeys
//! - `BaseFilter`, the closed set of primary selection predicates
//! - Value serialization used by property-value matching
//! - An in-memory repository evaluating the same semantics on loaded snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod filter;
pub mod memory;
pub mod params;
pub mod snapshot;
pub mod value;

pub use commit::{CommitId, CommitIdError, CommitMetadata, MAX_MAJOR};
pub use filter::{BaseFilter, FilterError};
pub use memory::{InMemorySnapshotRepository, RepositoryError};
pub use params::{QueryParams, QueryParamsBuilder};
pub use snapshot::{CdoSnapshot, GlobalId, SnapshotType, UnknownSnapshotType};
pub use value::{JsonValueSerializer, PropertyValue, SerializationError, ValueSerializer};
