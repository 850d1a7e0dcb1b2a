//! pg_rebuild_table — online, non-blocking rebuild of a PostgreSQL table.
//!
//! Rebuilds a table's physical storage (to reclaim bloat, reorder columns,
//! or change a column's type) without taking it offline: a shadow table is
//! built alongside the source, a row-level trigger forwards every mutation
//! into a delta table while the bulk copy runs, and the two are reconciled
//! under a brief `ACCESS EXCLUSIVE` lock at the very end.
//!
//! # Prior Art
//!
//! This is the same shape as `pg_repack` and `pg_squeeze`: trigger-based
//! change capture plus a chunked background copy plus an atomic rename,
//! rather than `CLUSTER`/`VACUUM FULL`'s exclusive-lock-for-the-duration
//! approach. `pgroll`'s expand/contract migrations use the equivalent
//! pattern one layer up, at the schema-migration level.

#![allow(dead_code)]

pub mod cleanup;
pub mod config;
pub mod copier;
pub mod delta;
pub mod engine;
pub mod error;
pub mod grants;
pub mod introspect;
pub mod metadata;
pub mod object_builder;
pub mod progress;
pub mod session;
pub mod swap;

pub use config::{RebuildArgs, RebuildConfig};
pub use engine::run;
pub use error::RebuildError;
