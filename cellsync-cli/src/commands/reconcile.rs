//! `cellsync reconcile` — run one reconciliation pass by hand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use cellsync_client::{HttpClaimClient, InstrumentedClient, MetricsSnapshot, RpcMetrics};
use cellsync_core::{config, ReconcileSummary, SqliteLeaseStore};
use cellsync_reconcile::{Failure, MemoryReporter, Reconciler, Tee, TracingReporter};

use super::home_dir;

/// Arguments for `cellsync reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Lease database (defaults to the configured path, then ~/.cellsync/leases.db).
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Topology Service base URL, overriding the config file.
    #[arg(long)]
    pub address: Option<String>,

    /// Cell identity sent with every RPC, overriding the config file.
    #[arg(long)]
    pub cell_id: Option<String>,

    /// Classify and count without committing, rolling back or deleting anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Print the RPC metrics in Prometheus text format after the run.
    #[arg(long, conflicts_with = "json")]
    pub metrics: bool,
}

#[derive(Serialize)]
struct ReconcileReportJson<'a> {
    dry_run: bool,
    summary: &'a ReconcileSummary,
    failures: &'a [Failure],
    rpc: &'a MetricsSnapshot,
}

#[derive(Tabled)]
struct CounterRow {
    #[tabled(rename = "counter")]
    counter: &'static str,
    #[tabled(rename = "value")]
    value: u64,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let mut cfg = config::load_at(&home).context("failed to load ~/.cellsync/config.yaml")?;
        if let Some(address) = self.address {
            cfg.topology_service.address = address;
        }
        if let Some(cell_id) = self.cell_id {
            cfg.topology_service.cell_id = cell_id;
        }

        let db_path = self
            .db
            .unwrap_or_else(|| config::database_path_at(&home, &cfg));
        let store = SqliteLeaseStore::open(&db_path)
            .with_context(|| format!("failed to open lease store '{}'", db_path.display()))?;

        let metrics = RpcMetrics::new(
            &cfg.topology_service.cell_id,
            &cfg.topology_service.address,
        )
        .context("failed to register RPC metrics")?;
        let client = InstrumentedClient::new(
            HttpClaimClient::new(&cfg.topology_service.address, &cfg.topology_service.cell_id),
            metrics.clone(),
        );

        let mut reconciler = Reconciler::new(client, store, cfg.reconcile.clone())
            .with_reporter(Tee(TracingReporter, MemoryReporter::default()))
            .dry_run(self.dry_run);
        let summary = reconciler.reconcile().with_context(|| {
            format!(
                "reconciliation against {} failed",
                cfg.topology_service.address
            )
        })?;

        let failures = &reconciler.reporter().1.failures;
        let snapshot = metrics.snapshot();
        if self.json {
            let payload = ReconcileReportJson {
                dry_run: self.dry_run,
                summary: &summary,
                failures,
                rpc: &snapshot,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize report")?
            );
            return Ok(());
        }

        print_table(&summary, failures, self.dry_run);
        if self.metrics {
            print!(
                "{}",
                metrics.encode_text().context("failed to encode RPC metrics")?
            );
        }
        Ok(())
    }
}

fn print_table(summary: &ReconcileSummary, failures: &[Failure], dry_run: bool) {
    let heading = if dry_run {
        "RECONCILE [dry-run]"
    } else {
        "RECONCILE"
    };
    println!("{}", heading.bold());

    let rows = vec![
        CounterRow {
            counter: "processed",
            value: summary.processed,
        },
        CounterRow {
            counter: "committed",
            value: summary.committed,
        },
        CounterRow {
            counter: "rolled back",
            value: summary.rolled_back,
        },
        CounterRow {
            counter: "pending",
            value: summary.pending,
        },
        CounterRow {
            counter: "orphaned",
            value: summary.orphaned,
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if failures.is_empty() {
        println!("{} no failures", "✓".green().bold());
        return;
    }
    println!(
        "{} {} step(s) failed and were skipped:",
        "!".yellow().bold(),
        failures.len()
    );
    for failure in failures {
        let target = match &failure.uuid {
            Some(uuid) => uuid.to_string(),
            None => failure.context.clone(),
        };
        println!("  {} {target}: {}", failure.operation, failure.error);
    }
}
