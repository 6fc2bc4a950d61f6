//! YAML configuration for a cell's reconciliation run.
//!
//! # Storage layout
//!
//! ```text
//! ~/.cellsync/
//!   config.yaml   (mode 0600, optional — defaults apply when absent)
//!   leases.db     (default local lease store)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{config_io_err, ConfigError};

pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const DEFAULT_ORPHAN_THRESHOLD: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_RPC_DEADLINE: Duration = Duration::from_secs(1);
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 500;

pub const DEFAULT_TOPOLOGY_ADDRESS: &str = "http://127.0.0.1:9095";
pub const DEFAULT_CELL_ID: &str = "1";

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Thresholds and limits for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Boundary between `Active` and `Stale`.
    #[serde(with = "seconds")]
    pub staleness_threshold: Duration,
    /// Remote scan page size.
    pub page_limit: usize,
    /// Minimum local staleness before orphan deletion is considered.
    #[serde(with = "seconds")]
    pub orphan_threshold: Duration,
    /// Deadline attached to every Topology Service call.
    #[serde(with = "seconds")]
    pub rpc_deadline: Duration,
    /// Local rows fetched per orphan sweep batch.
    pub sweep_batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            page_limit: DEFAULT_PAGE_LIMIT,
            orphan_threshold: DEFAULT_ORPHAN_THRESHOLD,
            rpc_deadline: DEFAULT_RPC_DEADLINE,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

impl ReconcileConfig {
    /// Reject combinations the engine cannot run safely with.
    ///
    /// The orphan threshold must exceed the staleness threshold so the sweeper
    /// never races a lease the scan could still legitimately commit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "page_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sweep_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.rpc_deadline.is_zero() {
            return Err(ConfigError::Invalid {
                field: "rpc_deadline",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.orphan_threshold <= self.staleness_threshold {
            return Err(ConfigError::Invalid {
                field: "orphan_threshold",
                reason: format!(
                    "must be greater than staleness_threshold ({}s <= {}s)",
                    self.orphan_threshold.as_secs_f64(),
                    self.staleness_threshold.as_secs_f64()
                ),
            });
        }
        Ok(())
    }
}

/// Where the Topology Service lives and who we are to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyServiceConfig {
    pub address: String,
    pub cell_id: String,
}

impl Default for TopologyServiceConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_TOPOLOGY_ADDRESS.to_string(),
            cell_id: DEFAULT_CELL_ID.to_string(),
        }
    }
}

/// Root of `~/.cellsync/config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellsyncConfig {
    pub topology_service: TopologyServiceConfig,
    /// SQLite lease store; `~/.cellsync/leases.db` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub reconcile: ReconcileConfig,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.cellsync/`
pub fn cellsync_root(home: &Path) -> PathBuf {
    home.join(".cellsync")
}

/// `<home>/.cellsync/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    cellsync_root(home).join("config.yaml")
}

/// Resolve the lease database path: explicit config value, else `<home>/.cellsync/leases.db`.
pub fn database_path_at(home: &Path, config: &CellsyncConfig) -> PathBuf {
    config
        .database
        .clone()
        .unwrap_or_else(|| cellsync_root(home).join("leases.db"))
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load `<home>/.cellsync/config.yaml`.
///
/// Returns defaults if the file does not exist,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<CellsyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(CellsyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| config_io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<CellsyncConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the config: serialize → `config.yaml.tmp` → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &CellsyncConfig) -> Result<PathBuf, ConfigError> {
    let dir = cellsync_root(home);
    std::fs::create_dir_all(&dir).map_err(|e| config_io_err(&dir, e))?;

    let path = config_path_at(home);
    let tmp = path.with_file_name("config.yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| config_io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| config_io_err(&path, e))?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &CellsyncConfig) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| config_io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

/// Durations as (fractional) seconds, e.g. `staleness_threshold: 300`.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = ReconcileConfig::default();
        assert_eq!(cfg.staleness_threshold, Duration::from_secs(300));
        assert_eq!(cfg.page_limit, 100);
        assert_eq!(cfg.orphan_threshold, Duration::from_secs(3600));
        assert_eq!(cfg.rpc_deadline, Duration::from_secs(1));
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_at(tmp.path()).unwrap();
        assert_eq!(cfg, CellsyncConfig::default());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = CellsyncConfig::default();
        cfg.topology_service.cell_id = "7".to_string();
        cfg.reconcile.rpc_deadline = Duration::from_millis(250);
        cfg.database = Some(PathBuf::from("/var/lib/cellsync/leases.db"));

        save_at(tmp.path(), &cfg).unwrap();
        let loaded = load_at(tmp.path()).unwrap();
        assert_eq!(loaded, cfg);

        let tmp_path = config_path_at(tmp.path()).with_file_name("config.yaml.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after rename");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = config_path_at(tmp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "reconcile:\n  staleness_threshold: 90\n").unwrap();

        let cfg = load_at(tmp.path()).unwrap();
        assert_eq!(cfg.reconcile.staleness_threshold, Duration::from_secs(90));
        assert_eq!(cfg.reconcile.page_limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(cfg.topology_service.address, DEFAULT_TOPOLOGY_ADDRESS);
    }

    #[test]
    fn orphan_threshold_must_exceed_staleness() {
        let cfg = ReconcileConfig {
            orphan_threshold: Duration::from_secs(300),
            ..ReconcileConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "orphan_threshold",
                ..
            }
        ));
    }

    #[test]
    fn database_path_defaults_under_home() {
        let home = Path::new("/home/cell");
        let cfg = CellsyncConfig::default();
        assert_eq!(
            database_path_at(home, &cfg),
            PathBuf::from("/home/cell/.cellsync/leases.db")
        );
    }
}
