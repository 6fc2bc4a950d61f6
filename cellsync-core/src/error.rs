//! Error types for cellsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.cellsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A value parsed fine but violates a reconciliation constraint.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// All errors that can arise from the local lease store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted `updated_at` could not be represented as a UTC timestamp.
    #[error("lease {uuid} has out-of-range updated_at ({millis} ms)")]
    InvalidTimestamp { uuid: String, millis: i64 },
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn config_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn store_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
