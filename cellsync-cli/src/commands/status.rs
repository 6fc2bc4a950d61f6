//! `cellsync status` — local lease freshness at a glance.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use cellsync_core::{config, Freshness, OutstandingLease, ReconcileConfig, SqliteLeaseStore};

use super::{format_seconds, home_dir};

/// Arguments for `cellsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Lease database (defaults to the configured path, then ~/.cellsync/leases.db).
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// Where a local lease sits relative to both thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
enum LocalState {
    Active,
    Stale,
    /// Past the orphan threshold; swept next run unless the remote still lists it.
    OrphanCandidate,
}

impl LocalState {
    fn of(lease: &OutstandingLease, now: DateTime<Utc>, cfg: &ReconcileConfig) -> Self {
        let updated_at = Some(lease.updated_at);
        if Freshness::classify(updated_at, now, cfg.orphan_threshold) == Freshness::Stale {
            LocalState::OrphanCandidate
        } else if Freshness::classify(updated_at, now, cfg.staleness_threshold) == Freshness::Stale
        {
            LocalState::Stale
        } else {
            LocalState::Active
        }
    }

    fn label(self) -> &'static str {
        match self {
            LocalState::Active => "ACTIVE",
            LocalState::Stale => "STALE",
            LocalState::OrphanCandidate => "ORPHAN?",
        }
    }

    fn indicator(self) -> String {
        match self {
            LocalState::Active => "■".green().bold().to_string(),
            LocalState::Stale => "■".yellow().bold().to_string(),
            LocalState::OrphanCandidate => "■".magenta().bold().to_string(),
        }
    }
}

#[derive(Serialize)]
struct StatusReportJson {
    database: String,
    summary: StatusSummaryJson,
    leases: Vec<LeaseStatusJson>,
}

#[derive(Serialize, Default)]
struct StatusSummaryJson {
    total: usize,
    active: usize,
    stale: usize,
    orphan_candidates: usize,
}

#[derive(Serialize)]
struct LeaseStatusJson {
    uuid: String,
    updated_at: String,
    age_seconds: u64,
    state: LocalState,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "uuid")]
    uuid: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "age")]
    age: String,
    #[tabled(rename = "updated at")]
    updated_at: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let cfg = config::load_at(&home).context("failed to load ~/.cellsync/config.yaml")?;
        let db_path = self
            .db
            .unwrap_or_else(|| config::database_path_at(&home, &cfg));
        let store = SqliteLeaseStore::open(&db_path)
            .with_context(|| format!("failed to open lease store '{}'", db_path.display()))?;
        let leases = store
            .list_all()
            .with_context(|| format!("failed to read leases from '{}'", db_path.display()))?;

        let now = Utc::now();
        let mut summary = StatusSummaryJson {
            total: leases.len(),
            ..Default::default()
        };
        let mut rows = Vec::with_capacity(leases.len());
        for lease in leases {
            let state = LocalState::of(&lease, now, &cfg.reconcile);
            match state {
                LocalState::Active => summary.active += 1,
                LocalState::Stale => summary.stale += 1,
                LocalState::OrphanCandidate => summary.orphan_candidates += 1,
            }
            rows.push(LeaseStatusJson {
                uuid: lease.uuid.to_string(),
                updated_at: lease.updated_at.to_rfc3339(),
                age_seconds: now
                    .signed_duration_since(lease.updated_at)
                    .num_seconds()
                    .max(0) as u64,
                state,
            });
        }

        let report = StatusReportJson {
            database: db_path.display().to_string(),
            summary,
            leases: rows,
        };
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status")?
            );
            return Ok(());
        }

        print_table(report);
        Ok(())
    }
}

fn print_table(report: StatusReportJson) {
    println!("{}", report.database.bold());
    if report.leases.is_empty() {
        println!("No outstanding leases.");
        return;
    }

    println!(
        "{} active  {} stale  {} orphan candidate",
        LocalState::Active.indicator(),
        LocalState::Stale.indicator(),
        LocalState::OrphanCandidate.indicator(),
    );
    let rows: Vec<StatusTableRow> = report
        .leases
        .into_iter()
        .map(|lease| StatusTableRow {
            uuid: lease.uuid,
            state: lease.state.label().to_string(),
            age: format_seconds(lease.age_seconds),
            updated_at: lease.updated_at,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!(
        "{} total, {} active, {} stale, {} orphan candidate(s)",
        report.summary.total,
        report.summary.active,
        report.summary.stale,
        report.summary.orphan_candidates
    );
}
