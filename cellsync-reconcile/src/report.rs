//! Failure and summary reporting side channel.
//!
//! The engine never retries; it hands every absorbed failure to a
//! [`Reporter`] with enough context (operation, uuid, time) to diagnose
//! recurring problems, then moves on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use cellsync_core::{LeaseUuid, ReconcileSummary};

/// The unit of work a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ListLeases,
    FetchLocal,
    CommitUpdate,
    RollbackUpdate,
    DeleteCommitted,
    SweepFetch,
    SweepDelete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ListLeases => "list_leases",
            Operation::FetchLocal => "fetch_local",
            Operation::CommitUpdate => "commit_update",
            Operation::RollbackUpdate => "rollback_update",
            Operation::DeleteCommitted => "delete_committed",
            Operation::SweepFetch => "sweep_fetch",
            Operation::SweepDelete => "sweep_delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One absorbed failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<LeaseUuid>,
    /// Batch or page context when the failure is not tied to one lease.
    pub context: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

impl Failure {
    pub fn for_lease(operation: Operation, uuid: &LeaseUuid, error: &dyn fmt::Display) -> Self {
        Self {
            operation,
            uuid: Some(uuid.clone()),
            context: String::new(),
            error: error.to_string(),
            at: Utc::now(),
        }
    }

    pub fn for_batch(
        operation: Operation,
        context: impl Into<String>,
        error: &dyn fmt::Display,
    ) -> Self {
        Self {
            operation,
            uuid: None,
            context: context.into(),
            error: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// Receiver for absorbed failures and the end-of-run summary.
pub trait Reporter {
    fn failure(&mut self, failure: Failure);

    fn summary(&mut self, _summary: &ReconcileSummary, _dry_run: bool) {}
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn failure(&mut self, failure: Failure) {
        (**self).failure(failure);
    }

    fn summary(&mut self, summary: &ReconcileSummary, dry_run: bool) {
        (**self).summary(summary, dry_run);
    }
}

/// Default reporter: structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn failure(&mut self, failure: Failure) {
        tracing::warn!(
            operation = failure.operation.as_str(),
            uuid = failure.uuid.as_ref().map(LeaseUuid::as_str).unwrap_or("-"),
            context = %failure.context,
            at = %failure.at.to_rfc3339(),
            error = %failure.error,
            "reconciliation step failed"
        );
    }

    fn summary(&mut self, summary: &ReconcileSummary, dry_run: bool) {
        tracing::info!(
            dry_run,
            processed = summary.processed,
            committed = summary.committed,
            rolled_back = summary.rolled_back,
            pending = summary.pending,
            orphaned = summary.orphaned,
            "reconciliation finished"
        );
    }
}

/// Collects everything in memory; used by tests and the CLI's JSON output.
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    pub failures: Vec<Failure>,
    pub summaries: Vec<ReconcileSummary>,
}

impl MemoryReporter {
    pub fn failures_for(&self, operation: Operation) -> Vec<&Failure> {
        self.failures
            .iter()
            .filter(|f| f.operation == operation)
            .collect()
    }
}

impl Reporter for MemoryReporter {
    fn failure(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    fn summary(&mut self, summary: &ReconcileSummary, _dry_run: bool) {
        self.summaries.push(*summary);
    }
}

/// Forward to two reporters, e.g. tracing plus an in-memory copy.
#[derive(Debug, Clone, Default)]
pub struct Tee<A, B>(pub A, pub B);

impl<A: Reporter, B: Reporter> Reporter for Tee<A, B> {
    fn failure(&mut self, failure: Failure) {
        self.0.failure(failure.clone());
        self.1.failure(failure);
    }

    fn summary(&mut self, summary: &ReconcileSummary, dry_run: bool) {
        self.0.summary(summary, dry_run);
        self.1.summary(summary, dry_run);
    }
}
