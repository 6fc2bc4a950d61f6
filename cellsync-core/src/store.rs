//! Local lease store.
//!
//! [`LeaseStore`] is the narrow contract reconciliation needs: batched lookup
//! by uuid, a keyset scan of stale rows, and bulk delete. [`SqliteLeaseStore`]
//! is the on-disk implementation.
//!
//! # Schema
//!
//! ```text
//! outstanding_leases(
//!   uuid       TEXT PRIMARY KEY,
//!   updated_at INTEGER NOT NULL,   -- unix milliseconds, UTC
//!   payload    TEXT                -- opaque to reconciliation
//! )
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{store_io_err, StoreError};
use crate::types::{LeaseUuid, OutstandingLease};

/// Upper bound on bound parameters per `IN (...)` statement.
const MAX_IN_PARAMS: usize = 500;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS outstanding_leases (
    uuid       TEXT PRIMARY KEY,
    updated_at INTEGER NOT NULL,
    payload    TEXT
);
CREATE INDEX IF NOT EXISTS outstanding_leases_updated_at
    ON outstanding_leases (updated_at, uuid);
";

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Position after the last row of a stale scan batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleCursor {
    pub updated_at: DateTime<Utc>,
    pub uuid: LeaseUuid,
}

impl From<&OutstandingLease> for StaleCursor {
    fn from(lease: &OutstandingLease) -> Self {
        Self {
            updated_at: lease.updated_at,
            uuid: lease.uuid.clone(),
        }
    }
}

/// Persistence operations the reconciliation engine and sweeper rely on.
pub trait LeaseStore {
    /// Look up every lease whose uuid is in `uuids`, in one call.
    ///
    /// Uuids with no local row are simply absent from the result.
    fn find_by_uuid_in(
        &self,
        uuids: &[LeaseUuid],
    ) -> Result<HashMap<LeaseUuid, OutstandingLease>, StoreError>;

    /// Up to `limit` leases with `updated_at < cutoff`, ordered by
    /// `(updated_at, uuid)` and strictly after `after` when given.
    fn find_stale_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&StaleCursor>,
        limit: usize,
    ) -> Result<Vec<OutstandingLease>, StoreError>;

    /// Delete every lease in `uuids`. Absent uuids are not an error.
    ///
    /// Returns the number of rows actually removed.
    fn delete(&self, uuids: &[LeaseUuid]) -> Result<usize, StoreError>;

    /// Lazily page through leases older than `cutoff` in batches of `batch_size`.
    fn scan_stale_before(&self, cutoff: DateTime<Utc>, batch_size: usize) -> StaleScan<'_, Self>
    where
        Self: Sized,
    {
        StaleScan::new(self, cutoff, batch_size)
    }
}

impl<S: LeaseStore + ?Sized> LeaseStore for &S {
    fn find_by_uuid_in(
        &self,
        uuids: &[LeaseUuid],
    ) -> Result<HashMap<LeaseUuid, OutstandingLease>, StoreError> {
        (**self).find_by_uuid_in(uuids)
    }

    fn find_stale_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&StaleCursor>,
        limit: usize,
    ) -> Result<Vec<OutstandingLease>, StoreError> {
        (**self).find_stale_before(cutoff, after, limit)
    }

    fn delete(&self, uuids: &[LeaseUuid]) -> Result<usize, StoreError> {
        (**self).delete(uuids)
    }
}

// ---------------------------------------------------------------------------
// StaleScan
// ---------------------------------------------------------------------------

/// Iterator over batches of stale leases.
///
/// Keyset pagination keeps the scan stable while earlier batches are deleted.
/// After a batch fails, the scan yields the error once and then stops.
pub struct StaleScan<'a, S: LeaseStore + ?Sized> {
    store: &'a S,
    cutoff: DateTime<Utc>,
    batch_size: usize,
    after: Option<StaleCursor>,
    done: bool,
}

impl<'a, S: LeaseStore + ?Sized> StaleScan<'a, S> {
    pub fn new(store: &'a S, cutoff: DateTime<Utc>, batch_size: usize) -> Self {
        Self {
            store,
            cutoff,
            batch_size: batch_size.max(1),
            after: None,
            done: false,
        }
    }
}

impl<S: LeaseStore + ?Sized> Iterator for StaleScan<'_, S> {
    type Item = Result<Vec<OutstandingLease>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let batch =
            match self
                .store
                .find_stale_before(self.cutoff, self.after.as_ref(), self.batch_size)
            {
                Ok(batch) => batch,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };

        let Some(last) = batch.last() else {
            self.done = true;
            return None;
        };
        self.after = Some(StaleCursor::from(last));
        if batch.len() < self.batch_size {
            self.done = true;
        }
        Some(Ok(batch))
    }
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// SQLite-backed [`LeaseStore`].
pub struct SqliteLeaseStore {
    conn: Connection,
}

impl SqliteLeaseStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| store_io_err(dir, e))?;
        }
        let conn = Connection::open(path)?;
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert or replace a lease row. Used by the owning cell, not by reconciliation.
    pub fn upsert(&self, lease: &OutstandingLease) -> Result<(), StoreError> {
        self.conn.execute(
            "
            INSERT INTO outstanding_leases (uuid, updated_at, payload)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(uuid) DO UPDATE SET
                updated_at = excluded.updated_at,
                payload = excluded.payload
            ",
            params![
                lease.uuid.as_str(),
                lease.updated_at.timestamp_millis(),
                lease.payload.as_deref()
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, uuid: &LeaseUuid) -> Result<Option<OutstandingLease>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT uuid, updated_at, payload FROM outstanding_leases WHERE uuid = ?1",
                params![uuid.as_str()],
                raw_row,
            )
            .optional()?;
        row.map(into_lease).transpose()
    }

    /// Every local lease, oldest first.
    pub fn list_all(&self) -> Result<Vec<OutstandingLease>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid, updated_at, payload FROM outstanding_leases ORDER BY updated_at, uuid",
        )?;
        let rows = stmt.query_map([], raw_row)?;
        collect_leases(rows)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM outstanding_leases", [], |row| {
                    row.get(0)
                })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl LeaseStore for SqliteLeaseStore {
    fn find_by_uuid_in(
        &self,
        uuids: &[LeaseUuid],
    ) -> Result<HashMap<LeaseUuid, OutstandingLease>, StoreError> {
        let mut found = HashMap::with_capacity(uuids.len());
        for chunk in uuids.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT uuid, updated_at, payload FROM outstanding_leases WHERE uuid IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(LeaseUuid::as_str)), raw_row)?;
            for lease in collect_leases(rows)? {
                found.insert(lease.uuid.clone(), lease);
            }
        }
        Ok(found)
    }

    fn find_stale_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&StaleCursor>,
        limit: usize,
    ) -> Result<Vec<OutstandingLease>, StoreError> {
        let cutoff_ms = cutoff.timestamp_millis();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        match after {
            None => {
                let mut stmt = self.conn.prepare(
                    "
                    SELECT uuid, updated_at, payload FROM outstanding_leases
                    WHERE updated_at < ?1
                    ORDER BY updated_at, uuid
                    LIMIT ?2
                    ",
                )?;
                let rows = stmt.query_map(params![cutoff_ms, limit], raw_row)?;
                collect_leases(rows)
            }
            Some(cursor) => {
                let mut stmt = self.conn.prepare(
                    "
                    SELECT uuid, updated_at, payload FROM outstanding_leases
                    WHERE updated_at < ?1
                      AND (updated_at > ?2 OR (updated_at = ?2 AND uuid > ?3))
                    ORDER BY updated_at, uuid
                    LIMIT ?4
                    ",
                )?;
                let rows = stmt.query_map(
                    params![
                        cutoff_ms,
                        cursor.updated_at.timestamp_millis(),
                        cursor.uuid.as_str(),
                        limit
                    ],
                    raw_row,
                )?;
                collect_leases(rows)
            }
        }
    }

    fn delete(&self, uuids: &[LeaseUuid]) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for chunk in uuids.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "DELETE FROM outstanding_leases WHERE uuid IN ({})",
                placeholders(chunk.len())
            );
            deleted += self
                .conn
                .execute(&sql, params_from_iter(chunk.iter().map(LeaseUuid::as_str)))?;
        }
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

type RawRow = (String, i64, Option<String>);

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_lease((uuid, millis, payload): RawRow) -> Result<OutstandingLease, StoreError> {
    let updated_at = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::InvalidTimestamp {
            uuid: uuid.clone(),
            millis,
        })?;
    Ok(OutstandingLease {
        uuid: LeaseUuid(uuid),
        updated_at,
        payload,
    })
}

fn collect_leases(
    rows: impl Iterator<Item = rusqlite::Result<RawRow>>,
) -> Result<Vec<OutstandingLease>, StoreError> {
    rows.map(|row| into_lease(row?)).collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
