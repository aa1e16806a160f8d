//! Link store abstraction
//!
//! The engine only talks to storage through the [`LinkStore`] trait, so the
//! scheduler can run against SQLite in production and an in-memory store in
//! tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Scheduler / Commands                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      LinkStore trait                        │
//! └─────────────────────────────────────────────────────────────┘
//!                   ┌──────────┴──────────┐
//!                   ▼                     ▼
//!         ┌─────────────────┐   ┌─────────────────┐
//!         │     SQLite      │   │     Memory      │
//!         │  Implementation │   │ Implementation  │
//!         └─────────────────┘   └─────────────────┘
//! ```
//!
//! Every counter update is a compare-and-set on `period_views`: the caller
//! passes the value it observed, and the write is rejected with
//! [`StoreError::CounterConflict`] if the row moved in the meantime. The log
//! row, the counter increment and the proxy ledger update commit together or
//! not at all.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::models::{AccessLogEntry, Link, LinkId, NewAccessLog, ProxyUsageRecord, VisitRecord};
use crate::scheduler::clock;
use crate::utils::error::StoreError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Repository Trait
// ============================================================================

/// Persistence for links, their access logs and the proxy usage ledger
pub trait LinkStore: Send + Sync {
    /// Register a URL, returning the id of the new or existing link
    ///
    /// Adding a URL that is already tracked is a no-op.
    fn add_link(&self, url: &str, now: DateTime<Utc>, initial_length: Duration)
        -> StoreResult<LinkId>;

    /// Remove a link together with its logs and proxy usage rows
    fn delete_link(&self, id: LinkId) -> StoreResult<bool>;

    /// Get link by ID
    fn get_link(&self, id: LinkId) -> StoreResult<Option<Link>>;

    /// All links with `active = true`, ordered by id
    fn list_active_links(&self) -> StoreResult<Vec<Link>>;

    /// All links, ordered by id
    fn list_links(&self) -> StoreResult<Vec<Link>>;

    /// Enable or pause a link
    fn set_active(&self, id: LinkId, active: bool) -> StoreResult<()>;

    /// Move a link into its next cycle starting at `now`
    ///
    /// Applied only while the stored cycle number still equals
    /// `expected_cycle`. Returns the updated link, or `None` when another
    /// caller already rolled it over.
    fn apply_rollover(
        &self,
        id: LinkId,
        expected_cycle: u32,
        now: DateTime<Utc>,
        length: Duration,
    ) -> StoreResult<Option<Link>>;

    /// Append a visit and bump the counters in one transaction
    ///
    /// Fails with `CounterConflict` if `period_views` is no longer
    /// `expected_period_views`, and with `QuotaExceeded` if the increment
    /// would push it past `quota`. The proxy in `entry`, if any, is stamped
    /// in the usage ledger at `entry.access_time`.
    fn record_visit(
        &self,
        id: LinkId,
        expected_period_views: u32,
        quota: u32,
        entry: &NewAccessLog,
    ) -> StoreResult<VisitRecord>;

    /// Store the scraped filename and description
    fn update_link_info(&self, id: LinkId, filename: &str, details: &str) -> StoreResult<()>;

    /// Stamp `(link, proxy)` as used at `now`
    fn upsert_proxy_usage(&self, id: LinkId, proxy: &str, now: DateTime<Utc>) -> StoreResult<()>;

    /// Proxies used for this link strictly after `since`
    fn recent_proxy_usage(&self, id: LinkId, since: DateTime<Utc>)
        -> StoreResult<HashSet<String>>;

    /// Last use of every proxy against this link, most recent first
    fn proxy_usage(&self, id: LinkId) -> StoreResult<Vec<ProxyUsageRecord>>;

    /// Most recent access log entries of a link, newest first
    fn access_logs(&self, id: LinkId, limit: usize) -> StoreResult<Vec<AccessLogEntry>>;
}

/// Thread-safe shared store
pub type SharedLinkStore = Arc<dyn LinkStore>;

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`LinkStore`]
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteLinkStore {
    conn: Mutex<Connection>,
}

const LINK_COLUMNS: &str = "id, url, date_added, cycle_number, cycle_start, cycle_end, \
     period_views, total_views, active, filename, file_details";

impl SqliteLinkStore {
    /// Open (or create) the database at `path`
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        // Other processes (CLI commands next to `run`) may hold the write lock.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite link store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create database schema
    fn create_schema(&self) -> StoreResult<()> {
        self.conn().execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS links (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    url TEXT NOT NULL UNIQUE,
                    date_added TEXT NOT NULL,
                    cycle_number INTEGER NOT NULL DEFAULT 1,
                    cycle_start TEXT NOT NULL,
                    cycle_end TEXT NOT NULL,
                    period_views INTEGER NOT NULL DEFAULT 0,
                    total_views INTEGER NOT NULL DEFAULT 0,
                    active INTEGER NOT NULL DEFAULT 1,
                    filename TEXT,
                    file_details TEXT
                );

                CREATE TABLE IF NOT EXISTS access_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                    access_time TEXT NOT NULL,
                    proxy_used TEXT,
                    status_code INTEGER,
                    error_message TEXT,
                    cycle INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_access_logs_link
                    ON access_logs(link_id, access_time);

                CREATE TABLE IF NOT EXISTS proxy_usage (
                    link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                    proxy TEXT NOT NULL,
                    used_at TEXT NOT NULL,
                    UNIQUE(link_id, proxy)
                );
                "#,
        )?;
        Ok(())
    }

    fn query_link(conn: &Connection, id: LinkId) -> StoreResult<Option<Link>> {
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_link).optional()?)
    }

    fn query_links(&self, active_only: bool) -> StoreResult<Vec<Link>> {
        let conn = self.conn();
        let filter = if active_only { "WHERE active = 1" } else { "" };
        let sql = format!("SELECT {LINK_COLUMNS} FROM links {filter} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let links = stmt
            .query_map([], row_to_link)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    fn counters(tx: &Transaction<'_>, id: LinkId) -> StoreResult<(u32, u32, i64)> {
        tx.query_row(
            "SELECT period_views, cycle_number, total_views FROM links WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?
        .ok_or(StoreError::LinkNotFound(id))
    }

    fn upsert_usage(conn: &Connection, id: LinkId, proxy: &str, at: DateTime<Utc>) -> StoreResult<()> {
        conn.execute(
            r#"
                INSERT INTO proxy_usage (link_id, proxy, used_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(link_id, proxy) DO UPDATE SET
                    used_at = excluded.used_at
                "#,
            params![id, proxy, to_sql_time(at)],
        )?;
        Ok(())
    }
}

/// Fixed-width RFC 3339 so that text comparison orders by time
fn to_sql_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_sql_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(0)?,
        url: row.get(1)?,
        date_added: parse_sql_time(row, 2)?,
        cycle_number: row.get(3)?,
        cycle_start: parse_sql_time(row, 4)?,
        cycle_end: parse_sql_time(row, 5)?,
        period_views: row.get(6)?,
        total_views: row.get::<_, i64>(7)?.max(0) as u64,
        active: row.get(8)?,
        filename: row.get(9)?,
        file_details: row.get(10)?,
    })
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<AccessLogEntry> {
    Ok(AccessLogEntry {
        id: row.get(0)?,
        link_id: row.get(1)?,
        access_time: parse_sql_time(row, 2)?,
        proxy_used: row.get(3)?,
        status_code: row.get(4)?,
        error_message: row.get(5)?,
        cycle: row.get(6)?,
    })
}

impl LinkStore for SqliteLinkStore {
    fn add_link(
        &self,
        url: &str,
        now: DateTime<Utc>,
        initial_length: Duration,
    ) -> StoreResult<LinkId> {
        let conn = self.conn();
        let inserted = conn.execute(
            r#"
                INSERT INTO links (url, date_added, cycle_number, cycle_start, cycle_end)
                VALUES (?1, ?2, 1, ?2, ?3)
                ON CONFLICT(url) DO NOTHING
                "#,
            params![url, to_sql_time(now), to_sql_time(now + initial_length)],
        )?;

        let id: LinkId =
            conn.query_row("SELECT id FROM links WHERE url = ?1", params![url], |row| {
                row.get(0)
            })?;

        if inserted > 0 {
            tracing::debug!(link_id = id, url = url, "Link added");
        }
        Ok(id)
    }

    fn delete_link(&self, id: LinkId) -> StoreResult<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM links WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn get_link(&self, id: LinkId) -> StoreResult<Option<Link>> {
        Self::query_link(&self.conn(), id)
    }

    fn list_active_links(&self) -> StoreResult<Vec<Link>> {
        self.query_links(true)
    }

    fn list_links(&self) -> StoreResult<Vec<Link>> {
        self.query_links(false)
    }

    fn set_active(&self, id: LinkId, active: bool) -> StoreResult<()> {
        let updated = self.conn().execute(
            "UPDATE links SET active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        if updated == 0 {
            return Err(StoreError::LinkNotFound(id));
        }
        Ok(())
    }

    fn apply_rollover(
        &self,
        id: LinkId,
        expected_cycle: u32,
        now: DateTime<Utc>,
        length: Duration,
    ) -> StoreResult<Option<Link>> {
        let conn = self.conn();
        let updated = conn.execute(
            r#"
                UPDATE links
                SET cycle_number = cycle_number + 1,
                    cycle_start = ?1,
                    cycle_end = ?2,
                    period_views = 0
                WHERE id = ?3 AND cycle_number = ?4
                "#,
            params![to_sql_time(now), to_sql_time(now + length), id, expected_cycle],
        )?;

        let link = Self::query_link(&conn, id)?.ok_or(StoreError::LinkNotFound(id))?;
        Ok((updated > 0).then_some(link))
    }

    fn record_visit(
        &self,
        id: LinkId,
        expected_period_views: u32,
        quota: u32,
        entry: &NewAccessLog,
    ) -> StoreResult<VisitRecord> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            r#"
                UPDATE links
                SET period_views = period_views + 1,
                    total_views = total_views + 1
                WHERE id = ?1 AND period_views = ?2 AND period_views < ?3
                "#,
            params![id, expected_period_views, quota],
        )?;

        let (period_views, cycle, total_views) = Self::counters(&tx, id)?;
        if updated == 0 {
            // Dropping the transaction rolls it back.
            return Err(if period_views != expected_period_views {
                StoreError::CounterConflict {
                    link_id: id,
                    expected: expected_period_views,
                    actual: period_views,
                }
            } else {
                StoreError::QuotaExceeded { link_id: id, quota }
            });
        }

        tx.execute(
            r#"
                INSERT INTO access_logs
                    (link_id, access_time, proxy_used, status_code, error_message, cycle)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            params![
                id,
                to_sql_time(entry.access_time),
                entry.proxy_used,
                entry.status_code,
                entry.error_message,
                cycle
            ],
        )?;
        let log_id = tx.last_insert_rowid();

        if let Some(proxy) = &entry.proxy_used {
            Self::upsert_usage(&tx, id, proxy, entry.access_time)?;
        }

        tx.commit()?;

        Ok(VisitRecord {
            log_id,
            cycle,
            period_views,
            total_views: total_views.max(0) as u64,
        })
    }

    fn update_link_info(&self, id: LinkId, filename: &str, details: &str) -> StoreResult<()> {
        let updated = self.conn().execute(
            "UPDATE links SET filename = ?1, file_details = ?2 WHERE id = ?3",
            params![filename, details, id],
        )?;
        if updated == 0 {
            return Err(StoreError::LinkNotFound(id));
        }
        Ok(())
    }

    fn upsert_proxy_usage(&self, id: LinkId, proxy: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn();
        if Self::query_link(&conn, id)?.is_none() {
            return Err(StoreError::LinkNotFound(id));
        }
        Self::upsert_usage(&conn, id, proxy, now)
    }

    fn recent_proxy_usage(
        &self,
        id: LinkId,
        since: DateTime<Utc>,
    ) -> StoreResult<HashSet<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT proxy FROM proxy_usage WHERE link_id = ?1 AND used_at > ?2")?;
        let proxies = stmt
            .query_map(params![id, to_sql_time(since)], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(proxies)
    }

    fn proxy_usage(&self, id: LinkId) -> StoreResult<Vec<ProxyUsageRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT link_id, proxy, used_at FROM proxy_usage WHERE link_id = ?1
             ORDER BY used_at DESC, proxy",
        )?;
        let records = stmt
            .query_map(params![id], |row| {
                Ok(ProxyUsageRecord {
                    link_id: row.get(0)?,
                    proxy: row.get(1)?,
                    used_at: parse_sql_time(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn access_logs(&self, id: LinkId, limit: usize) -> StoreResult<Vec<AccessLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
                SELECT id, link_id, access_time, proxy_used, status_code, error_message, cycle
                FROM access_logs
                WHERE link_id = ?1
                ORDER BY access_time DESC, id DESC
                LIMIT ?2
                "#,
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let logs = stmt
            .query_map(params![id, limit], row_to_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}

// ============================================================================
// Memory Implementation
// ============================================================================

#[derive(Default)]
struct MemoryState {
    links: BTreeMap<LinkId, Link>,
    logs: Vec<AccessLogEntry>,
    proxy_usage: HashMap<(LinkId, String), DateTime<Utc>>,
    next_link_id: LinkId,
    next_log_id: i64,
}

/// In-memory implementation of [`LinkStore`]
///
/// Useful for tests and dry runs without a database file.
#[derive(Default)]
pub struct MemoryLinkStore {
    state: RwLock<MemoryState>,
}

impl MemoryLinkStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored links
    pub fn len(&self) -> usize {
        self.read().links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().links.is_empty()
    }

    /// Replace a stored link wholesale (test setup)
    pub fn put_link(&self, link: Link) {
        let mut state = self.write();
        state.next_link_id = state.next_link_id.max(link.id);
        state.links.insert(link.id, link);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LinkStore for MemoryLinkStore {
    fn add_link(
        &self,
        url: &str,
        now: DateTime<Utc>,
        initial_length: Duration,
    ) -> StoreResult<LinkId> {
        let mut state = self.write();
        if let Some(existing) = state.links.values().find(|l| l.url == url) {
            return Ok(existing.id);
        }
        state.next_link_id += 1;
        let id = state.next_link_id;
        state.links.insert(id, Link::new(id, url, now, initial_length));
        Ok(id)
    }

    fn delete_link(&self, id: LinkId) -> StoreResult<bool> {
        let mut state = self.write();
        if state.links.remove(&id).is_none() {
            return Ok(false);
        }
        state.logs.retain(|log| log.link_id != id);
        state.proxy_usage.retain(|(link_id, _), _| *link_id != id);
        Ok(true)
    }

    fn get_link(&self, id: LinkId) -> StoreResult<Option<Link>> {
        Ok(self.read().links.get(&id).cloned())
    }

    fn list_active_links(&self) -> StoreResult<Vec<Link>> {
        Ok(self.read().links.values().filter(|l| l.active).cloned().collect())
    }

    fn list_links(&self) -> StoreResult<Vec<Link>> {
        Ok(self.read().links.values().cloned().collect())
    }

    fn set_active(&self, id: LinkId, active: bool) -> StoreResult<()> {
        let mut state = self.write();
        let link = state.links.get_mut(&id).ok_or(StoreError::LinkNotFound(id))?;
        link.active = active;
        Ok(())
    }

    fn apply_rollover(
        &self,
        id: LinkId,
        expected_cycle: u32,
        now: DateTime<Utc>,
        length: Duration,
    ) -> StoreResult<Option<Link>> {
        let mut state = self.write();
        let link = state.links.get_mut(&id).ok_or(StoreError::LinkNotFound(id))?;
        if link.cycle_number != expected_cycle {
            return Ok(None);
        }
        *link = clock::rollover(link, now, length);
        Ok(Some(link.clone()))
    }

    fn record_visit(
        &self,
        id: LinkId,
        expected_period_views: u32,
        quota: u32,
        entry: &NewAccessLog,
    ) -> StoreResult<VisitRecord> {
        let mut state = self.write();
        let state = &mut *state;

        let link = state.links.get_mut(&id).ok_or(StoreError::LinkNotFound(id))?;
        if link.period_views != expected_period_views {
            return Err(StoreError::CounterConflict {
                link_id: id,
                expected: expected_period_views,
                actual: link.period_views,
            });
        }
        if link.period_views >= quota {
            return Err(StoreError::QuotaExceeded { link_id: id, quota });
        }

        link.period_views += 1;
        link.total_views += 1;

        state.next_log_id += 1;
        state.logs.push(AccessLogEntry {
            id: state.next_log_id,
            link_id: id,
            access_time: entry.access_time,
            proxy_used: entry.proxy_used.clone(),
            status_code: entry.status_code,
            error_message: entry.error_message.clone(),
            cycle: link.cycle_number,
        });

        if let Some(proxy) = &entry.proxy_used {
            state
                .proxy_usage
                .insert((id, proxy.clone()), entry.access_time);
        }

        Ok(VisitRecord {
            log_id: state.next_log_id,
            cycle: link.cycle_number,
            period_views: link.period_views,
            total_views: link.total_views,
        })
    }

    fn update_link_info(&self, id: LinkId, filename: &str, details: &str) -> StoreResult<()> {
        let mut state = self.write();
        let link = state.links.get_mut(&id).ok_or(StoreError::LinkNotFound(id))?;
        link.filename = Some(filename.to_string());
        link.file_details = Some(details.to_string());
        Ok(())
    }

    fn upsert_proxy_usage(&self, id: LinkId, proxy: &str, now: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.write();
        if !state.links.contains_key(&id) {
            return Err(StoreError::LinkNotFound(id));
        }
        state.proxy_usage.insert((id, proxy.to_string()), now);
        Ok(())
    }

    fn recent_proxy_usage(
        &self,
        id: LinkId,
        since: DateTime<Utc>,
    ) -> StoreResult<HashSet<String>> {
        Ok(self
            .read()
            .proxy_usage
            .iter()
            .filter(|((link_id, _), used_at)| *link_id == id && **used_at > since)
            .map(|((_, proxy), _)| proxy.clone())
            .collect())
    }

    fn proxy_usage(&self, id: LinkId) -> StoreResult<Vec<ProxyUsageRecord>> {
        let mut records: Vec<ProxyUsageRecord> = self
            .read()
            .proxy_usage
            .iter()
            .filter(|((link_id, _), _)| *link_id == id)
            .map(|((link_id, proxy), used_at)| ProxyUsageRecord {
                link_id: *link_id,
                proxy: proxy.clone(),
                used_at: *used_at,
            })
            .collect();
        records.sort_by(|a, b| b.used_at.cmp(&a.used_at).then_with(|| a.proxy.cmp(&b.proxy)));
        Ok(records)
    }

    fn access_logs(&self, id: LinkId, limit: usize) -> StoreResult<Vec<AccessLogEntry>> {
        let mut logs: Vec<AccessLogEntry> = self
            .read()
            .logs
            .iter()
            .filter(|log| log.link_id == id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.access_time.cmp(&a.access_time).then(b.id.cmp(&a.id)));
        logs.truncate(limit);
        Ok(logs)
    }
}

// ============================================================================
// Shared Store Constructors
// ============================================================================

/// Create a shared SQLite store
pub fn create_sqlite_store(path: impl AsRef<Path>) -> StoreResult<SharedLinkStore> {
    Ok(Arc::new(SqliteLinkStore::new(path)?))
}

/// Create a shared in-memory store
pub fn create_memory_store() -> SharedLinkStore {
    Arc::new(MemoryLinkStore::new())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_stores() -> Vec<Box<dyn LinkStore>> {
        vec![
            Box::new(SqliteLinkStore::in_memory().unwrap()),
            Box::new(MemoryLinkStore::new()),
        ]
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 30, 0).unwrap()
    }

    fn visit(at: DateTime<Utc>, proxy: Option<&str>) -> NewAccessLog {
        NewAccessLog::answered(at, proxy.map(String::from), 200)
    }

    #[test]
    fn test_add_link_is_idempotent() {
        for store in create_test_stores() {
            let a = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            let again = store
                .add_link("https://f.example/a", t0() + Duration::days(3), Duration::days(10))
                .unwrap();
            let b = store.add_link("https://f.example/b", t0(), Duration::days(45)).unwrap();

            assert_eq!(a, again);
            assert_ne!(a, b);

            let link = store.get_link(a).unwrap().unwrap();
            assert_eq!(link.cycle_number, 1);
            assert_eq!(link.cycle_start, t0());
            assert_eq!(link.cycle_end, t0() + Duration::days(45));
            assert!(link.active);
            assert_eq!(store.list_links().unwrap().len(), 2);
        }
    }

    #[test]
    fn test_record_visit_updates_counters_and_ledger() {
        for store in create_test_stores() {
            let id = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();

            let record = store
                .record_visit(id, 0, 100, &visit(t0(), Some("http://p:1")))
                .unwrap();
            assert_eq!(record.period_views, 1);
            assert_eq!(record.total_views, 1);
            assert_eq!(record.cycle, 1);

            let logs = store.access_logs(id, 10).unwrap();
            assert_eq!(logs.len(), 1);
            assert_eq!(logs[0].id, record.log_id);
            assert_eq!(logs[0].proxy_used.as_deref(), Some("http://p:1"));
            assert_eq!(logs[0].status_code, Some(200));

            let recent = store
                .recent_proxy_usage(id, t0() - Duration::hours(24))
                .unwrap();
            assert!(recent.contains("http://p:1"));
        }
    }

    #[test]
    fn test_record_visit_rejects_stale_counter() {
        for store in create_test_stores() {
            let id = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            store.record_visit(id, 0, 100, &visit(t0(), Some("http://p:1"))).unwrap();

            let err = store
                .record_visit(id, 0, 100, &visit(t0(), Some("http://p:2")))
                .unwrap_err();
            assert!(matches!(
                err,
                StoreError::CounterConflict { expected: 0, actual: 1, .. }
            ));

            // Nothing from the rejected visit is kept
            assert_eq!(store.access_logs(id, 10).unwrap().len(), 1);
            let recent = store.recent_proxy_usage(id, t0() - Duration::days(1)).unwrap();
            assert!(!recent.contains("http://p:2"));
            assert_eq!(store.get_link(id).unwrap().unwrap().period_views, 1);
        }
    }

    #[test]
    fn test_record_visit_never_exceeds_quota() {
        for store in create_test_stores() {
            let id = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            for n in 0..3 {
                store.record_visit(id, n, 3, &visit(t0(), None)).unwrap();
            }
            let err = store.record_visit(id, 3, 3, &visit(t0(), None)).unwrap_err();
            assert!(matches!(err, StoreError::QuotaExceeded { quota: 3, .. }));
            assert_eq!(store.get_link(id).unwrap().unwrap().period_views, 3);
        }
    }

    #[test]
    fn test_record_visit_on_missing_link() {
        for store in create_test_stores() {
            let err = store.record_visit(99, 0, 100, &visit(t0(), None)).unwrap_err();
            assert!(matches!(err, StoreError::LinkNotFound(99)));
        }
    }

    #[test]
    fn test_rollover_is_guarded_by_cycle_number() {
        for store in create_test_stores() {
            let id = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            store.record_visit(id, 0, 100, &visit(t0(), None)).unwrap();

            let now = t0() + Duration::days(46);
            let rolled = store
                .apply_rollover(id, 1, now, Duration::days(45))
                .unwrap()
                .unwrap();
            assert_eq!(rolled.cycle_number, 2);
            assert_eq!(rolled.period_views, 0);
            assert_eq!(rolled.total_views, 1);
            assert_eq!(rolled.cycle_start, now);
            assert_eq!(rolled.cycle_end, now + Duration::days(45));

            // A second observer with the old cycle number changes nothing
            assert!(store
                .apply_rollover(id, 1, now + Duration::hours(1), Duration::days(45))
                .unwrap()
                .is_none());
            assert_eq!(store.get_link(id).unwrap().unwrap().cycle_number, 2);

            let record = store.record_visit(id, 0, 100, &visit(now, None)).unwrap();
            assert_eq!(record.cycle, 2);
        }
    }

    #[test]
    fn test_delete_cascades() {
        for store in create_test_stores() {
            let id = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            store.record_visit(id, 0, 100, &visit(t0(), Some("http://p:1"))).unwrap();

            assert!(store.delete_link(id).unwrap());
            assert!(!store.delete_link(id).unwrap());
            assert!(store.get_link(id).unwrap().is_none());
            assert!(store.access_logs(id, 10).unwrap().is_empty());
            assert!(store.proxy_usage(id).unwrap().is_empty());
        }
    }

    #[test]
    fn test_proxy_usage_upsert_and_cooldown_window() {
        for store in create_test_stores() {
            let id = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            store.upsert_proxy_usage(id, "http://a:1", t0()).unwrap();
            store
                .upsert_proxy_usage(id, "http://b:2", t0() - Duration::hours(30))
                .unwrap();

            let since = t0() - Duration::hours(24);
            let recent = store.recent_proxy_usage(id, since).unwrap();
            assert_eq!(recent, HashSet::from(["http://a:1".to_string()]));

            // Re-using b moves its stamp forward instead of adding a row
            store.upsert_proxy_usage(id, "http://b:2", t0()).unwrap();
            assert_eq!(store.proxy_usage(id).unwrap().len(), 2);
            assert_eq!(store.recent_proxy_usage(id, since).unwrap().len(), 2);

            assert!(matches!(
                store.upsert_proxy_usage(42, "http://a:1", t0()),
                Err(StoreError::LinkNotFound(42))
            ));
        }
    }

    #[test]
    fn test_active_filter_and_link_info() {
        for store in create_test_stores() {
            let a = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            let b = store.add_link("https://f.example/b", t0(), Duration::days(45)).unwrap();

            store.set_active(b, false).unwrap();
            let active: Vec<LinkId> =
                store.list_active_links().unwrap().iter().map(|l| l.id).collect();
            assert_eq!(active, vec![a]);

            store.update_link_info(a, "report.pdf", "2.1 MB").unwrap();
            let link = store.get_link(a).unwrap().unwrap();
            assert_eq!(link.filename.as_deref(), Some("report.pdf"));
            assert_eq!(link.file_details.as_deref(), Some("2.1 MB"));

            assert!(store.set_active(99, true).is_err());
            assert!(store.update_link_info(99, "x", "y").is_err());
        }
    }

    #[test]
    fn test_access_logs_newest_first_with_limit() {
        for store in create_test_stores() {
            let id = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            for n in 0..5u32 {
                let at = t0() + Duration::minutes(n as i64);
                let entry = if n % 2 == 0 {
                    visit(at, None)
                } else {
                    NewAccessLog::failed(at, None, None, "Request timeout")
                };
                store.record_visit(id, n, 100, &entry).unwrap();
            }

            let logs = store.access_logs(id, 3).unwrap();
            assert_eq!(logs.len(), 3);
            assert_eq!(logs[0].access_time, t0() + Duration::minutes(4));
            assert_eq!(logs[1].error_message.as_deref(), Some("Request timeout"));
            assert!(logs[1].status_code.is_none());
        }
    }

    #[test]
    fn test_sqlite_store_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("revisit.db");

        let id = {
            let store = SqliteLinkStore::new(&path).unwrap();
            let id = store.add_link("https://f.example/a", t0(), Duration::days(45)).unwrap();
            store.record_visit(id, 0, 100, &visit(t0(), Some("http://p:1"))).unwrap();
            id
        };

        let reopened = SqliteLinkStore::new(&path).unwrap();
        let link = reopened.get_link(id).unwrap().unwrap();
        assert_eq!(link.period_views, 1);
        assert_eq!(link.cycle_end, t0() + Duration::days(45));
    }

    #[test]
    fn test_memory_store_utilities() {
        let store = MemoryLinkStore::new();
        assert!(store.is_empty());

        let mut link = Link::new(10, "https://f.example/x", t0(), Duration::days(1));
        link.period_views = 5;
        store.put_link(link);
        assert_eq!(store.len(), 1);

        // Ids keep increasing past manually inserted links
        let next = store.add_link("https://f.example/y", t0(), Duration::days(1)).unwrap();
        assert_eq!(next, 11);
    }
}
