//! The reconciliation table.
//!
//! | Local \ Remote | Active | Stale    | Missing      |
//! |----------------|--------|----------|--------------|
//! | Active         | no-op  | no-op    | no-op        |
//! | Stale          | commit | commit   | delete local |
//! | Missing        | no-op  | rollback | ignore       |
//!
//! A page scan only ever sees leases present remotely, so `DeleteLocal` and
//! `Ignore` are realised by the orphan sweeper after the scan, not here.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use cellsync_core::{Freshness, LeaseUuid, OutstandingLease, RemoteLease};

/// What the table prescribes for one lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    NoOp,
    Commit,
    DeleteLocal,
    Rollback,
    Ignore,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::NoOp => write!(f, "no-op"),
            Action::Commit => write!(f, "commit"),
            Action::DeleteLocal => write!(f, "delete-local"),
            Action::Rollback => write!(f, "rollback"),
            Action::Ignore => write!(f, "ignore"),
        }
    }
}

/// Look up the table cell for a `(local, remote)` pair.
pub fn action(local: Freshness, remote: Freshness) -> Action {
    use Freshness::{Active, Missing, Stale};

    match (local, remote) {
        (Active, _) => Action::NoOp,
        (Stale, Active | Stale) => Action::Commit,
        (Stale, Missing) => Action::DeleteLocal,
        (Missing, Active) => Action::NoOp,
        (Missing, Stale) => Action::Rollback,
        (Missing, Missing) => Action::Ignore,
    }
}

/// Actions for one remote page, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagePlan {
    /// Local-stale leases the remote still holds.
    pub commit: Vec<LeaseUuid>,
    /// Remote-stale leases with no local row.
    pub rollback: Vec<LeaseUuid>,
    /// Remote-active leases with no local row.
    pub pending: u64,
}

/// Classify a remote page against its local snapshot.
///
/// `local` must be fetched after the page itself so a row confirmed by a
/// concurrent writer is not mistaken for missing.
pub fn plan_page(
    remote: &[RemoteLease],
    local: &HashMap<LeaseUuid, OutstandingLease>,
    now: DateTime<Utc>,
    staleness_threshold: Duration,
) -> PagePlan {
    let mut plan = PagePlan::default();
    for lease in remote {
        let local_row = local.get(&lease.uuid);
        let local_state =
            Freshness::classify(local_row.map(|l| l.updated_at), now, staleness_threshold);
        let remote_state = Freshness::classify(Some(lease.updated_at), now, staleness_threshold);

        match action(local_state, remote_state) {
            Action::Commit => plan.commit.push(lease.uuid.clone()),
            Action::Rollback => plan.rollback.push(lease.uuid.clone()),
            Action::NoOp if local_state == Freshness::Missing => plan.pending += 1,
            Action::NoOp | Action::DeleteLocal | Action::Ignore => {}
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rstest::rstest;

    use Freshness::{Active, Missing, Stale};

    #[rstest]
    #[case(Active, Active, Action::NoOp)]
    #[case(Active, Stale, Action::NoOp)]
    #[case(Active, Missing, Action::NoOp)]
    #[case(Stale, Active, Action::Commit)]
    #[case(Stale, Stale, Action::Commit)]
    #[case(Stale, Missing, Action::DeleteLocal)]
    #[case(Missing, Active, Action::NoOp)]
    #[case(Missing, Stale, Action::Rollback)]
    #[case(Missing, Missing, Action::Ignore)]
    fn table_cell(#[case] local: Freshness, #[case] remote: Freshness, #[case] expected: Action) {
        assert_eq!(action(local, remote), expected);
    }

    #[test]
    fn plan_splits_page_by_table() {
        let now = Utc::now();
        let threshold = Duration::from_secs(300);
        let minutes_ago = |m: i64| now - ChronoDuration::minutes(m);

        let remote = vec![
            RemoteLease::new("commit-me", minutes_ago(2)),
            RemoteLease::new("commit-too", minutes_ago(20)),
            RemoteLease::new("roll-back", minutes_ago(10)),
            RemoteLease::new("in-flight", minutes_ago(1)),
            RemoteLease::new("locally-active", minutes_ago(30)),
        ];
        let mut local = HashMap::new();
        for (uuid, age) in [("commit-me", 10), ("commit-too", 15), ("locally-active", 1)] {
            local.insert(
                LeaseUuid::from(uuid),
                OutstandingLease::new(uuid, minutes_ago(age)),
            );
        }

        let plan = plan_page(&remote, &local, now, threshold);
        assert_eq!(
            plan.commit,
            vec![LeaseUuid::from("commit-me"), LeaseUuid::from("commit-too")]
        );
        assert_eq!(plan.rollback, vec![LeaseUuid::from("roll-back")]);
        assert_eq!(plan.pending, 1);
    }

    #[test]
    fn empty_local_snapshot_is_all_remote_only() {
        let now = Utc::now();
        let remote = vec![
            RemoteLease::new("a", now),
            RemoteLease::new("b", now - ChronoDuration::hours(1)),
        ];
        let plan = plan_page(&remote, &HashMap::new(), now, Duration::from_secs(300));
        assert!(plan.commit.is_empty());
        assert_eq!(plan.rollback, vec![LeaseUuid::from("b")]);
        assert_eq!(plan.pending, 1);
    }
}
