//! Cellsync core library — lease types, configuration, local lease store.
//!
//! Public API surface:
//! - [`types`] — newtypes, lease records, freshness and run summary
//! - [`error`] — [`ConfigError`], [`StoreError`]
//! - [`config`] — YAML config load / save / validate
//! - [`store`] — [`LeaseStore`] trait, SQLite implementation, stale scan

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::{CellsyncConfig, ReconcileConfig, TopologyServiceConfig};
pub use error::{ConfigError, StoreError};
pub use store::{LeaseStore, SqliteLeaseStore, StaleCursor, StaleScan};
pub use types::{Freshness, LeasePage, LeaseUuid, OutstandingLease, ReconcileSummary, RemoteLease};
