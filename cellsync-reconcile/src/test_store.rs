//! A [`LeaseStore`] wrapper that fails chosen calls, for exercising error paths.

use std::cell::Cell;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use cellsync_core::{LeaseStore, LeaseUuid, OutstandingLease, SqliteLeaseStore, StaleCursor, StoreError};

/// Delegates to `inner`, failing the n-th (0-based) call of each method when set.
pub(crate) struct FlakyStore {
    pub inner: SqliteLeaseStore,
    pub fail_lookup_at: Option<usize>,
    pub fail_stale_at: Option<usize>,
    pub fail_delete_at: Option<usize>,
    pub lookups: Cell<usize>,
    pub stale_fetches: Cell<usize>,
    pub deletes: Cell<usize>,
}

impl FlakyStore {
    pub fn new(inner: SqliteLeaseStore) -> Self {
        Self {
            inner,
            fail_lookup_at: None,
            fail_stale_at: None,
            fail_delete_at: None,
            lookups: Cell::new(0),
            stale_fetches: Cell::new(0),
            deletes: Cell::new(0),
        }
    }
}

fn tick(counter: &Cell<usize>, fail_at: Option<usize>) -> Result<(), StoreError> {
    let call = counter.get();
    counter.set(call + 1);
    if fail_at == Some(call) {
        return Err(StoreError::Io {
            path: "leases.db".into(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "database is locked"),
        });
    }
    Ok(())
}

impl LeaseStore for FlakyStore {
    fn find_by_uuid_in(
        &self,
        uuids: &[LeaseUuid],
    ) -> Result<HashMap<LeaseUuid, OutstandingLease>, StoreError> {
        tick(&self.lookups, self.fail_lookup_at)?;
        self.inner.find_by_uuid_in(uuids)
    }

    fn find_stale_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&StaleCursor>,
        limit: usize,
    ) -> Result<Vec<OutstandingLease>, StoreError> {
        tick(&self.stale_fetches, self.fail_stale_at)?;
        self.inner.find_stale_before(cutoff, after, limit)
    }

    fn delete(&self, uuids: &[LeaseUuid]) -> Result<usize, StoreError> {
        tick(&self.deletes, self.fail_delete_at)?;
        self.inner.delete(uuids)
    }
}
