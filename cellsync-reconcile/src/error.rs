//! Error types for cellsync-reconcile.

use thiserror::Error;

use cellsync_client::ClientError;
use cellsync_core::ConfigError;

/// Run-fatal errors. Everything else is reported and absorbed per lease or batch.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The remote scan could not produce a page; nothing left to reconcile.
    #[error("failed to list remote leases: {0}")]
    List(#[source] ClientError),

    /// The thresholds handed to the engine are unusable.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
