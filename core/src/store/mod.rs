//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Services call store methods and never execute SQL directly.
//!
//! Every multi-step mutation runs inside [`BankStore::atomic`], which takes
//! SQLite's write lock up front (`BEGIN IMMEDIATE`). A second connection
//! attempting the same read-check-write sequence waits on the busy timeout
//! until the first commits or rolls back.

use crate::{
    error::{DfsError, DfsResult},
    event::{event_type_name, DfsEvent, EventLogEntry},
    types::format_ts,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

mod account;
mod agency;
mod agent;
mod queue;

/// How long a writer waits for another connection's transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BankStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl BankStore {
    pub fn open(path: &str) -> DfsResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> DfsResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> DfsResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> DfsResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_core_banking.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_agency.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_authorization_queue.sql"))?;
        Ok(())
    }

    // ── Unit of work ───────────────────────────────────────────

    /// Run `f` as one atomic unit: commit if it returns `Ok`, roll back
    /// otherwise. Calls made while a unit is already open join it, so the
    /// outermost caller owns the commit.
    pub fn atomic<T>(&self, f: impl FnOnce(&Self) -> DfsResult<T>) -> DfsResult<T> {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &DfsEvent, at: &DateTime<Utc>) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (event_type, entity_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event_type_name(event),
                event.entity_id(),
                serde_json::to_string(event)?,
                format_ts(at),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_entity(&self, entity_id: &str) -> DfsResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, entity_id, payload, created_at
             FROM event_log WHERE entity_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![entity_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    event_type: row.get(1)?,
                    entity_id: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, event_type: &str) -> DfsResult<i64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
            params![event_type],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

// ── Column helpers ─────────────────────────────────────────────────

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read a TEXT timestamp column.
fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

/// Read a TEXT decimal column (rates, never amounts).
fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_json_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Map a UNIQUE constraint violation to a domain conflict.
fn unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Fail with a domain error when an UPDATE touched no row.
fn expect_one(changed: usize, on_miss: impl FnOnce() -> DfsError) -> DfsResult<()> {
    if changed == 1 {
        Ok(())
    } else {
        Err(on_miss())
    }
}
