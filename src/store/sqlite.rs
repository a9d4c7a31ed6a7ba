//! SQLite store: `sessions` + `activities`, linked by a cascading foreign key.
//!
//! The connection is opened lazily on first use. A connection-level failure
//! drops it, and the next call re-opens and re-applies the schema, so a broken
//! database file never takes the process down.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use tracing::{debug, info, warn};

use super::ActivityStore;
use crate::error::{Result, TrailError};
use crate::models::{Activity, Session, StoreStats, TimeRange};
use crate::projections::ActionBreakdown;

const BACKEND: &str = "sqlite";

const SELECT_ACTIVITY: &str = "SELECT id, session_id, timestamp, received_at, action, target,
        value, page, user_agent, screen_resolution, ip_address
     FROM activities";

const SELECT_SESSION: &str = "SELECT session_id, user_agent, screen_resolution, ip_address,
        first_seen, last_seen, activity_count
     FROM sessions";

// First writer wins on descriptive columns; aggregates widen on every hit.
const UPSERT_SESSION: &str = "INSERT INTO sessions (
        session_id, user_agent, screen_resolution, ip_address,
        first_seen, last_seen, activity_count
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)
    ON CONFLICT(session_id) DO UPDATE SET
        first_seen = min(first_seen, excluded.first_seen),
        last_seen = max(last_seen, excluded.last_seen),
        activity_count = activity_count + 1";

const INSERT_ACTIVITY: &str = "INSERT INTO activities (
        id, session_id, timestamp, received_at, action, target,
        value, page, user_agent, screen_resolution, ip_address
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

/// Durable activity store backed by one SQLite file.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("connected", &self.conn.lock().is_some())
            .finish()
    }
}

impl SqliteStore {
    /// Create a store for `path` without touching the filesystem yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    /// Create a store and initialize the database immediately.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(path);
        store.ensure_ready()?;
        Ok(store)
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the connection if it is not open yet.
    pub fn ensure_ready(&self) -> Result<()> {
        self.with_conn(|_| Ok(()))
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TrailError::storage_unavailable(
                        BACKEND,
                        format!("cannot create {}: {e}", parent.display()),
                    )
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        info!(path = %self.path.display(), "sqlite store initialized");
        Ok(conn)
    }

    /// Run `f` against the live connection, opening it first if needed.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect().map_err(|e| {
                warn!(path = %self.path.display(), error = %e, "sqlite store unavailable");
                e
            })?,
        };

        let result = f(&mut conn);
        match &result {
            Err(e) if is_connection_failure(e) => {
                warn!(error = %e, "dropping sqlite connection, will reopen on next call");
            }
            _ => *guard = Some(conn),
        }
        result.map_err(TrailError::from)
    }

    fn fill_pages(conn: &Connection, sessions: &mut [Session]) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare_cached(
            "SELECT page FROM activities WHERE session_id = ?1
             GROUP BY page ORDER BY min(timestamp), min(rowid)",
        )?;
        for session in sessions.iter_mut() {
            session.pages = stmt
                .query_map(params![session.session_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
        }
        Ok(())
    }

    fn load_sessions(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> rusqlite::Result<Vec<Session>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let mut sessions = stmt
            .query_map(params, session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        Self::fill_pages(conn, &mut sessions)?;
        Ok(sessions)
    }
}

impl ActivityStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn append(&self, activity: Activity) -> Result<Activity> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.prepare_cached(UPSERT_SESSION)?.execute(params![
                activity.session_id,
                activity.user_agent,
                activity.screen_resolution,
                activity.ip_address,
                ts_to_sql(activity.timestamp),
            ])?;
            tx.prepare_cached(INSERT_ACTIVITY)?.execute(params![
                activity.id,
                activity.session_id,
                ts_to_sql(activity.timestamp),
                ts_to_sql(activity.received_at),
                activity.action,
                activity.target,
                activity.value,
                activity.page,
                activity.user_agent,
                activity.screen_resolution,
                activity.ip_address,
            ])?;
            tx.commit()
        })?;
        debug!(id = %activity.id, session = %activity.session_id, "activity persisted");
        Ok(activity)
    }

    fn query_all(&self, limit: usize) -> Result<Vec<Activity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "{SELECT_ACTIVITY} ORDER BY timestamp DESC, rowid DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![sql_limit(limit)], activity_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn query_by_session(&self, session_id: &str) -> Result<Vec<Activity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "{SELECT_ACTIVITY} WHERE session_id = ?1 ORDER BY timestamp ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map(params![session_id], activity_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn query_by_time_range(&self, range: TimeRange, limit: usize) -> Result<Vec<Activity>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "{SELECT_ACTIVITY} WHERE timestamp >= ?1 AND timestamp <= ?2
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![ts_to_sql(range.start), ts_to_sql(range.end), sql_limit(limit)],
                    activity_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn sessions(&self, limit: usize) -> Result<Vec<Session>> {
        self.with_conn(|conn| {
            Self::load_sessions(
                conn,
                &format!("{SELECT_SESSION} ORDER BY last_seen DESC LIMIT ?1"),
                params![sql_limit(limit)],
            )
        })
    }

    fn sessions_by_time_range(&self, range: TimeRange, limit: usize) -> Result<Vec<Session>> {
        self.with_conn(|conn| {
            Self::load_sessions(
                conn,
                &format!(
                    "{SELECT_SESSION} WHERE first_seen >= ?1 AND first_seen <= ?2
                     ORDER BY last_seen DESC LIMIT ?3"
                ),
                params![ts_to_sql(range.start), ts_to_sql(range.end), sql_limit(limit)],
            )
        })
    }

    fn session(&self, session_id: &str) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            let found = conn
                .prepare_cached(&format!("{SELECT_SESSION} WHERE session_id = ?1"))?
                .query_row(params![session_id], session_from_row)
                .optional()?;
            match found {
                Some(session) => {
                    let mut one = [session];
                    Self::fill_pages(conn, &mut one)?;
                    let [session] = one;
                    Ok(Some(session))
                }
                None => Ok(None),
            }
        })
    }

    fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let hour_ago = ts_to_sql(now - Duration::hours(1));
        let day_ago = ts_to_sql(now - Duration::hours(24));

        let (sessions, actions) = self.with_conn(|conn| {
            let sessions: (i64, i64, i64) = conn.query_row(
                "SELECT COUNT(*),
                        COUNT(CASE WHEN last_seen >= ?1 THEN 1 END),
                        COUNT(CASE WHEN last_seen >= ?2 THEN 1 END)
                 FROM sessions",
                params![hour_ago, day_ago],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let mut stmt =
                conn.prepare_cached("SELECT action, COUNT(*) FROM activities GROUP BY action")?;
            let actions = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((sessions, actions))
        })?;

        let total_activities: u64 = actions.iter().map(|(_, count)| count).sum();
        Ok(StoreStats {
            backend: BACKEND.to_string(),
            total_sessions: sessions.0 as u64,
            active_last_hour: sessions.1 as u64,
            active_last_24h: sessions.2 as u64,
            total_activities,
            actions: ActionBreakdown::from_counts(actions),
        })
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = ts_to_sql(cutoff);
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM activities WHERE timestamp < ?1",
                params![cutoff],
            )?;
            tx.execute(
                "DELETE FROM sessions
                 WHERE session_id NOT IN (SELECT DISTINCT session_id FROM activities)",
                [],
            )?;
            // Sessions that lost only part of their history.
            tx.execute(
                "UPDATE sessions SET
                    first_seen = (SELECT min(timestamp) FROM activities a
                                  WHERE a.session_id = sessions.session_id),
                    activity_count = (SELECT COUNT(*) FROM activities a
                                      WHERE a.session_id = sessions.session_id)
                 WHERE first_seen < ?1",
                params![cutoff],
            )?;
            tx.commit()?;
            Ok(removed)
        })
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            user_agent TEXT,
            screen_resolution TEXT,
            ip_address TEXT NOT NULL,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            activity_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS activities (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
            timestamp TEXT NOT NULL,
            received_at TEXT NOT NULL,
            action TEXT NOT NULL,
            target TEXT NOT NULL,
            value TEXT,
            page TEXT NOT NULL,
            user_agent TEXT,
            screen_resolution TEXT,
            ip_address TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_activities_session_id ON activities(session_id);
        CREATE INDEX IF NOT EXISTS idx_activities_timestamp ON activities(timestamp);
        CREATE INDEX IF NOT EXISTS idx_activities_action ON activities(action);
        CREATE INDEX IF NOT EXISTS idx_sessions_last_seen ON sessions(last_seen);",
    )?;
    Ok(())
}

/// Fixed-width UTC text, so lexical order matches time order.
fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn ts_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        session_id: row.get(1)?,
        timestamp: ts_from_row(row, 2)?,
        received_at: ts_from_row(row, 3)?,
        action: row.get(4)?,
        target: row.get(5)?,
        value: row.get(6)?,
        page: row.get(7)?,
        user_agent: row.get(8)?,
        screen_resolution: row.get(9)?,
        ip_address: row.get(10)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        session_id: row.get(0)?,
        user_agent: row.get(1)?,
        screen_resolution: row.get(2)?,
        ip_address: row.get(3)?,
        first_seen: ts_from_row(row, 4)?,
        last_seen: ts_from_row(row, 5)?,
        activity_count: row.get::<_, i64>(6)? as u64,
        pages: Vec::new(),
    })
}

fn is_connection_failure(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::ReadOnly
        ),
        _ => false,
    }
}
