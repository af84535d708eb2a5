//! # SnapQ Store
//!
//! `SQLite` execution of assembled snapshot queries.
//!
//! This crate provides:
//! - `StoreConfig`, loaded from `SNAPQ_*` environment variables
//! - `SqliteSnapshotStore`, which persists commits and answers
//!   `find_snapshots` by running the assembled query

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod sqlite;

pub use config::StoreConfig;
pub use sqlite::{SqliteSnapshotStore, StoreError};
