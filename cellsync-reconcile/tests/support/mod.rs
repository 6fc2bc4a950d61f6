//! In-memory claim service used by the scenario tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use cellsync_client::{method, ClaimClient, ClientError, StatusCode};
use cellsync_core::{LeasePage, LeaseUuid, OutstandingLease, RemoteLease, SqliteLeaseStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(Option<String>),
    Commit(LeaseUuid),
    Rollback(LeaseUuid),
}

/// Remote leases ordered by uuid; cursors are the last uuid of a page, so
/// rollbacks during a scan never shift later pages.
pub struct FakeClaimService {
    now: DateTime<Utc>,
    leases: RefCell<BTreeMap<LeaseUuid, DateTime<Utc>>>,
    calls: RefCell<Vec<Call>>,
    fail_commit: HashSet<LeaseUuid>,
    fail_list_on_page: Option<usize>,
}

impl FakeClaimService {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            leases: RefCell::new(BTreeMap::new()),
            calls: RefCell::new(Vec::new()),
            fail_commit: HashSet::new(),
            fail_list_on_page: None,
        }
    }

    pub fn with_lease(self, uuid: &str, updated_at: DateTime<Utc>) -> Self {
        self.leases
            .borrow_mut()
            .insert(LeaseUuid::from(uuid), updated_at);
        self
    }

    pub fn failing_commit(mut self, uuid: &str) -> Self {
        self.fail_commit.insert(LeaseUuid::from(uuid));
        self
    }

    pub fn failing_list_on_page(mut self, page: usize) -> Self {
        self.fail_list_on_page = Some(page);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn list_calls(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::List(_)))
            .count()
    }

    pub fn remote_updated_at(&self, uuid: &str) -> Option<DateTime<Utc>> {
        self.leases.borrow().get(&LeaseUuid::from(uuid)).copied()
    }

    fn unavailable(rpc: &'static str) -> ClientError {
        ClientError::Status {
            method: rpc,
            code: StatusCode::Unavailable,
            message: "injected failure".into(),
        }
    }
}

impl ClaimClient for FakeClaimService {
    fn list_leases(
        &self,
        cursor: Option<&str>,
        limit: usize,
        _deadline: Duration,
    ) -> Result<LeasePage, ClientError> {
        let page_number = self.list_calls();
        self.calls
            .borrow_mut()
            .push(Call::List(cursor.map(str::to_string)));
        if self.fail_list_on_page == Some(page_number) {
            return Err(Self::unavailable(method::LIST_LEASES));
        }

        let leases = self.leases.borrow();
        let remaining: Vec<RemoteLease> = leases
            .iter()
            .filter(|(uuid, _)| cursor.map_or(true, |c| uuid.as_str() > c))
            .map(|(uuid, at)| RemoteLease::new(uuid.clone(), *at))
            .collect();
        let more = remaining.len() > limit;
        let page: Vec<RemoteLease> = remaining.into_iter().take(limit).collect();
        let next_cursor = match page.last() {
            Some(last) if more => Some(last.uuid.to_string()),
            _ => None,
        };
        Ok(LeasePage {
            leases: page,
            next_cursor,
        })
    }

    fn commit_update(&self, uuid: &LeaseUuid, _deadline: Duration) -> Result<(), ClientError> {
        self.calls.borrow_mut().push(Call::Commit(uuid.clone()));
        if self.fail_commit.contains(uuid) {
            return Err(Self::unavailable(method::COMMIT_UPDATE));
        }
        if let Some(at) = self.leases.borrow_mut().get_mut(uuid) {
            *at = self.now;
        }
        Ok(())
    }

    fn rollback_update(&self, uuid: &LeaseUuid, _deadline: Duration) -> Result<(), ClientError> {
        self.calls.borrow_mut().push(Call::Rollback(uuid.clone()));
        self.leases.borrow_mut().remove(uuid);
        Ok(())
    }
}

pub fn local_store(rows: &[(&str, DateTime<Utc>)]) -> SqliteLeaseStore {
    let store = SqliteLeaseStore::in_memory().expect("in-memory store");
    for (uuid, updated_at) in rows {
        store
            .upsert(&OutstandingLease::new(*uuid, *updated_at))
            .expect("seed local lease");
    }
    store
}

pub fn minutes_ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now - chrono::Duration::minutes(minutes)
}
