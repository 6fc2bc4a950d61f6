//! Orphan sweeper.
//!
//! Runs after the remote scan. Deletes local leases that are older than the
//! orphan cutoff and whose uuid never appeared on any remote page of the run.
//! The orphan threshold is much longer than the staleness threshold, so a
//! lease must be unseen for many staleness windows before it is presumed gone.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use cellsync_core::{LeaseStore, LeaseUuid};

use crate::report::{Failure, Operation, Reporter};

/// Sweep orphans in batches of `batch_size`; returns how many were deleted
/// (or would be, under `dry_run`).
///
/// A failed delete skips that batch. A failed fetch ends the sweep, since the
/// keyset cursor cannot move past a batch it never read.
pub fn sweep<S, R>(
    store: &S,
    seen_remote: &HashSet<LeaseUuid>,
    cutoff: DateTime<Utc>,
    batch_size: usize,
    reporter: &mut R,
    dry_run: bool,
) -> u64
where
    S: LeaseStore,
    R: Reporter + ?Sized,
{
    let mut orphaned = 0u64;
    for (index, batch) in store.scan_stale_before(cutoff, batch_size).enumerate() {
        let batch = match batch {
            Ok(batch) => batch,
            Err(err) => {
                reporter.failure(Failure::for_batch(
                    Operation::SweepFetch,
                    format!("batch {index}, cutoff {}", cutoff.to_rfc3339()),
                    &err,
                ));
                break;
            }
        };

        let orphans: Vec<LeaseUuid> = batch
            .into_iter()
            .filter(|lease| !seen_remote.contains(&lease.uuid))
            .map(|lease| lease.uuid)
            .collect();
        if orphans.is_empty() {
            continue;
        }

        if dry_run {
            tracing::info!(
                batch = index,
                orphans = orphans.len(),
                "[dry-run] would delete orphaned leases"
            );
            orphaned += orphans.len() as u64;
            continue;
        }

        match store.delete(&orphans) {
            Ok(deleted) => {
                tracing::info!(batch = index, deleted, "deleted orphaned leases");
                orphaned += deleted as u64;
            }
            Err(err) => reporter.failure(Failure::for_batch(
                Operation::SweepDelete,
                format!("batch {index}, {} orphan(s)", orphans.len()),
                &err,
            )),
        }
    }
    orphaned
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    use cellsync_core::{OutstandingLease, SqliteLeaseStore};

    use crate::report::MemoryReporter;
    use crate::test_store::FlakyStore;

    fn store_with(now: DateTime<Utc>, rows: &[(&str, i64)]) -> SqliteLeaseStore {
        let store = SqliteLeaseStore::in_memory().expect("store");
        for (uuid, age_minutes) in rows {
            store
                .upsert(&OutstandingLease::new(*uuid, now - Duration::minutes(*age_minutes)))
                .expect("upsert");
        }
        store
    }

    #[test]
    fn deletes_only_unseen_rows_past_cutoff() {
        let now = Utc::now();
        let store = store_with(now, &[("fresh", 1), ("recent-stale", 30), ("seen", 120), ("orphan", 120)]);
        let seen: HashSet<LeaseUuid> = [LeaseUuid::from("seen")].into_iter().collect();
        let mut reporter = MemoryReporter::default();

        let orphaned = sweep(&store, &seen, now - Duration::hours(1), 10, &mut reporter, false);

        assert_eq!(orphaned, 1);
        assert!(store.get(&LeaseUuid::from("orphan")).expect("get").is_none());
        assert_eq!(store.count().expect("count"), 3);
        assert!(reporter.failures.is_empty());
    }

    #[test]
    fn dry_run_counts_without_deleting() {
        let now = Utc::now();
        let store = store_with(now, &[("a", 120), ("b", 180)]);
        let mut reporter = MemoryReporter::default();

        let orphaned = sweep(&store, &HashSet::new(), now - Duration::hours(1), 1, &mut reporter, true);

        assert_eq!(orphaned, 2);
        assert_eq!(store.count().expect("count"), 2);
    }

    #[test]
    fn failed_batch_delete_does_not_stop_later_batches() {
        let now = Utc::now();
        let store = FlakyStore {
            fail_delete_at: Some(0),
            ..FlakyStore::new(store_with(now, &[("a", 300), ("b", 240), ("c", 180)]))
        };
        let mut reporter = MemoryReporter::default();

        let orphaned = sweep(&store, &HashSet::new(), now - Duration::hours(1), 1, &mut reporter, false);

        assert_eq!(orphaned, 2);
        assert_eq!(reporter.failures_for(Operation::SweepDelete).len(), 1);
        assert!(store.inner.get(&LeaseUuid::from("a")).expect("get").is_some());
        assert_eq!(store.inner.count().expect("count"), 1);
    }

    #[test]
    fn failed_batch_fetch_ends_sweep_with_earlier_deletes_counted() {
        let now = Utc::now();
        let store = FlakyStore {
            fail_stale_at: Some(1),
            ..FlakyStore::new(store_with(now, &[("a", 300), ("b", 240), ("c", 180)]))
        };
        let mut reporter = MemoryReporter::default();

        let orphaned = sweep(&store, &HashSet::new(), now - Duration::hours(1), 1, &mut reporter, false);

        assert_eq!(orphaned, 1);
        assert_eq!(store.stale_fetches.get(), 2);
        assert_eq!(store.deletes.get(), 1);
        assert!(store.inner.get(&LeaseUuid::from("a")).expect("get").is_none());
        assert_eq!(store.inner.count().expect("count"), 2);

        assert_eq!(reporter.failures.len(), 1);
        let failure = &reporter.failures[0];
        assert_eq!(failure.operation, Operation::SweepFetch);
        assert!(failure.uuid.is_none());
        assert!(failure.context.starts_with("batch 1, cutoff "), "{}", failure.context);
        assert!(failure.error.contains("database is locked"), "{}", failure.error);
    }
}
