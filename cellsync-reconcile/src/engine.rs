//! The reconciliation run.
//!
//! One [`Reconciler::reconcile`] call walks the remote lease scan page by page,
//! applies the table from [`crate::classify`] to each page and its local
//! snapshot, then hands the set of uuids it saw to the orphan sweeper. All
//! counters live in the returned [`ReconcileSummary`]; nothing persists between
//! runs.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use cellsync_client::ClaimClient;
use cellsync_core::types::cutoff_before;
use cellsync_core::{LeaseStore, LeaseUuid, ReconcileConfig, ReconcileSummary};

use crate::classify::{plan_page, PagePlan};
use crate::error::ReconcileError;
use crate::report::{Failure, Operation, Reporter, TracingReporter};
use crate::sweeper;

/// Drives reconciliation between a [`ClaimClient`] and a [`LeaseStore`].
pub struct Reconciler<C, S, R = TracingReporter> {
    client: C,
    store: S,
    reporter: R,
    config: ReconcileConfig,
    dry_run: bool,
}

impl<C, S> Reconciler<C, S, TracingReporter>
where
    C: ClaimClient,
    S: LeaseStore,
{
    pub fn new(client: C, store: S, config: ReconcileConfig) -> Self {
        Self {
            client,
            store,
            reporter: TracingReporter,
            config,
            dry_run: false,
        }
    }
}

impl<C, S, R> Reconciler<C, S, R>
where
    C: ClaimClient,
    S: LeaseStore,
    R: Reporter,
{
    /// Swap the failure/summary side channel.
    pub fn with_reporter<R2: Reporter>(self, reporter: R2) -> Reconciler<C, S, R2> {
        Reconciler {
            client: self.client,
            store: self.store,
            reporter,
            config: self.config,
            dry_run: self.dry_run,
        }
    }

    /// Classify and count without calling commit/rollback or deleting rows.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Run one full reconciliation pass against the current time.
    pub fn reconcile(&mut self) -> Result<ReconcileSummary, ReconcileError> {
        self.reconcile_at(Utc::now())
    }

    /// Run one pass with every staleness decision made against `now`.
    ///
    /// Only a failed `list_leases` or an unusable config aborts the run;
    /// every other failure is reported and costs only that lease or batch.
    pub fn reconcile_at(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<ReconcileSummary, ReconcileError> {
        self.config.validate()?;

        let mut summary = ReconcileSummary::default();
        let mut seen_remote: HashSet<LeaseUuid> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut page_index = 0usize;

        loop {
            let page = match self.client.list_leases(
                cursor.as_deref(),
                self.config.page_limit,
                self.config.rpc_deadline,
            ) {
                Ok(page) => page,
                Err(err) => {
                    self.reporter.failure(Failure::for_batch(
                        Operation::ListLeases,
                        format!(
                            "page {page_index}, cursor {}",
                            cursor.as_deref().unwrap_or("<start>")
                        ),
                        &err,
                    ));
                    return Err(ReconcileError::List(err));
                }
            };
            if page.leases.is_empty() {
                break;
            }

            let uuids: Vec<LeaseUuid> = page.leases.iter().map(|l| l.uuid.clone()).collect();
            seen_remote.extend(uuids.iter().cloned());

            match self.store.find_by_uuid_in(&uuids) {
                Ok(local) => {
                    let plan =
                        plan_page(&page.leases, &local, now, self.config.staleness_threshold);
                    self.apply_plan(plan, &mut summary);
                    summary.processed += page.leases.len() as u64;
                }
                Err(err) => self.reporter.failure(Failure::for_batch(
                    Operation::FetchLocal,
                    format!("page {page_index}, {} lease(s)", uuids.len()),
                    &err,
                )),
            }

            let next = match page.next_cursor() {
                Some(next) => next.to_string(),
                None => break,
            };
            if cursor.as_deref() == Some(next.as_str()) {
                tracing::warn!(
                    cursor = %next,
                    page = page_index,
                    "remote returned the same cursor twice; ending scan"
                );
                break;
            }
            cursor = Some(next);
            page_index += 1;
        }

        summary.orphaned = sweeper::sweep(
            &self.store,
            &seen_remote,
            cutoff_before(now, self.config.orphan_threshold),
            self.config.sweep_batch_size,
            &mut self.reporter,
            self.dry_run,
        );

        self.reporter.summary(&summary, self.dry_run);
        Ok(summary)
    }

    fn apply_plan(&mut self, plan: PagePlan, summary: &mut ReconcileSummary) {
        summary.pending += plan.pending;

        if self.dry_run {
            for uuid in &plan.commit {
                tracing::info!(uuid = %uuid, "[dry-run] would commit lease");
            }
            for uuid in &plan.rollback {
                tracing::info!(uuid = %uuid, "[dry-run] would roll back lease");
            }
            summary.committed += plan.commit.len() as u64;
            summary.rolled_back += plan.rollback.len() as u64;
            return;
        }

        let deadline = self.config.rpc_deadline;

        let mut committed = Vec::with_capacity(plan.commit.len());
        for uuid in plan.commit {
            match self.client.commit_update(&uuid, deadline) {
                Ok(()) => committed.push(uuid),
                Err(err) => self
                    .reporter
                    .failure(Failure::for_lease(Operation::CommitUpdate, &uuid, &err)),
            }
        }
        if !committed.is_empty() {
            // Remote now owns these; the local row is only a pending marker.
            if let Err(err) = self.store.delete(&committed) {
                self.reporter.failure(Failure::for_batch(
                    Operation::DeleteCommitted,
                    format!("{} committed lease(s)", committed.len()),
                    &err,
                ));
            }
            tracing::info!(count = committed.len(), "committed leases");
        }
        summary.committed += committed.len() as u64;

        for uuid in plan.rollback {
            match self.client.rollback_update(&uuid, deadline) {
                Ok(()) => {
                    tracing::info!(uuid = %uuid, "rolled back lease");
                    summary.rolled_back += 1;
                }
                Err(err) => self
                    .reporter
                    .failure(Failure::for_lease(Operation::RollbackUpdate, &uuid, &err)),
            }
        }
    }
}
