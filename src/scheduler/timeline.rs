//! Run timeline persistence.
//!
//! [`RunTimeline`] is the durable log of every run the scheduler ever
//! committed, including runs superseded before they fired. The dispatcher
//! relies on read-after-write within the process: once a write returns, the
//! next read observes it.
//!
//! [`SqliteRunTimeline`] is the production implementation, backed by a
//! single SQLite file (or an in-memory database for tests).

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::run::{RunStatistics, RunStatus, RunTransition, ScheduledRun};
use super::schema::{apply_schema, read_schema_version};

/// Errors from the run timeline store.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("corrupt run row: {0}")]
    Corrupt(String),
}

/// Start of a `days`-long window ending at `now`.
///
/// Windows reaching past the earliest representable instant start there,
/// so an oversized window simply covers the whole timeline.
pub fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Durable append/update log of scheduled runs.
pub trait RunTimeline: Send + Sync {
    /// Insert a new run.
    fn insert(&self, run: &ScheduledRun) -> Result<(), TimelineError>;

    /// Apply a guarded status transition.
    ///
    /// Returns `false` when the run does not exist or is not in the
    /// transition's source status (e.g. it was superseded).
    fn update_status(&self, id: &str, transition: &RunTransition) -> Result<bool, TimelineError>;

    /// Mark every `Scheduled` run as `Cancelled`. Returns the number changed.
    fn cancel_all_scheduled(&self) -> Result<usize, TimelineError>;

    /// Supersede all `Scheduled` runs and insert `run`.
    ///
    /// Returns the number of runs superseded. Implementations should make
    /// the pair atomic; the default runs the two steps back to back.
    fn commit(&self, run: &ScheduledRun) -> Result<usize, TimelineError> {
        let cancelled = self.cancel_all_scheduled()?;
        self.insert(run)?;
        Ok(cancelled)
    }

    /// Most recently updated runs first. An empty filter matches every status.
    fn recent(
        &self,
        limit: usize,
        statuses: &[RunStatus],
    ) -> Result<Vec<ScheduledRun>, TimelineError>;

    fn find_by_id(&self, id: &str) -> Result<Option<ScheduledRun>, TimelineError>;

    /// Most recently created runs for `topic` first.
    fn find_by_topic(&self, topic: &str, limit: usize)
    -> Result<Vec<ScheduledRun>, TimelineError>;

    /// Most recently created failed runs first.
    fn failed(&self, limit: usize) -> Result<Vec<ScheduledRun>, TimelineError>;

    /// Every `Scheduled` or `Executing` run, newest created first.
    fn active_runs(&self) -> Result<Vec<ScheduledRun>, TimelineError>;

    /// Counts and averages over runs created in the last `period_days`.
    fn statistics(
        &self,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> Result<RunStatistics, TimelineError>;

    /// Number of runs with `status` created at or after `since`.
    fn count_with_status_since(
        &self,
        status: RunStatus,
        since: DateTime<Utc>,
    ) -> Result<u64, TimelineError>;

    /// Delete terminal runs created before `cutoff`. Active runs are kept.
    fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TimelineError>;

    /// The pending run, if any.
    fn next_scheduled(&self) -> Result<Option<ScheduledRun>, TimelineError> {
        Ok(self.recent(1, &[RunStatus::Scheduled])?.into_iter().next())
    }
}

const RUN_COLUMNS: &str = "id, scheduled_time, actual_execution_time, reason, topic, details, \
     status, error_message, execution_duration_ms, result_payload, created_at, updated_at";

/// SQLite-backed run timeline.
///
/// Thread-safe via an internal `Mutex<Connection>`; all access is serialized.
pub struct SqliteRunTimeline {
    conn: Mutex<Connection>,
}

impl SqliteRunTimeline {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, TimelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TimelineError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, discarded on drop.
    pub fn open_in_memory() -> Result<Self, TimelineError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, TimelineError> {
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read the schema version from the database.
    pub fn schema_version(&self) -> Result<Option<u32>, TimelineError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, TimelineError> {
        self.conn
            .lock()
            .map_err(|e| TimelineError::Lock(e.to_string()))
    }

    fn query_runs(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ScheduledRun>, TimelineError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_run)?;

        let mut runs = Vec::new();
        for r in rows {
            runs.push(r?);
        }
        Ok(runs)
    }
}

impl RunTimeline for SqliteRunTimeline {
    fn insert(&self, run: &ScheduledRun) -> Result<(), TimelineError> {
        let conn = self.lock()?;
        insert_run(&conn, run)?;
        Ok(())
    }

    fn update_status(&self, id: &str, transition: &RunTransition) -> Result<bool, TimelineError> {
        let conn = self.lock()?;
        let now = to_millis(Utc::now());
        let from = transition.source().as_str();
        let to = transition.target().as_str();

        let rows = match transition {
            RunTransition::Executing { started_at } => conn.execute(
                "UPDATE scheduled_runs SET status = ?1, actual_execution_time = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
                params![to, to_millis(*started_at), now, id, from],
            )?,
            RunTransition::Completed {
                duration_ms,
                result_payload,
            } => conn.execute(
                "UPDATE scheduled_runs SET status = ?1, execution_duration_ms = ?2, \
                 result_payload = ?3, updated_at = ?4 WHERE id = ?5 AND status = ?6",
                params![to, duration_to_sql(*duration_ms), result_payload, now, id, from],
            )?,
            RunTransition::Failed {
                duration_ms,
                error_message,
            } => conn.execute(
                "UPDATE scheduled_runs SET status = ?1, execution_duration_ms = ?2, \
                 error_message = ?3, updated_at = ?4 WHERE id = ?5 AND status = ?6",
                params![
                    to,
                    duration_ms.map(duration_to_sql),
                    error_message,
                    now,
                    id,
                    from
                ],
            )?,
            RunTransition::Cancelled => conn.execute(
                "UPDATE scheduled_runs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to, now, id, from],
            )?,
        };

        Ok(rows == 1)
    }

    fn cancel_all_scheduled(&self) -> Result<usize, TimelineError> {
        let conn = self.lock()?;
        Ok(cancel_scheduled(&conn, Utc::now())?)
    }

    fn commit(&self, run: &ScheduledRun) -> Result<usize, TimelineError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let cancelled = cancel_scheduled(&tx, run.created_at)?;
        insert_run(&tx, run)?;
        tx.commit()?;
        Ok(cancelled)
    }

    fn recent(
        &self,
        limit: usize,
        statuses: &[RunStatus],
    ) -> Result<Vec<ScheduledRun>, TimelineError> {
        let filter = if statuses.is_empty() {
            String::new()
        } else {
            // Status strings are fixed identifiers from `RunStatus::as_str`.
            let list = statuses
                .iter()
                .map(|s| format!("'{}'", s.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            format!("WHERE status IN ({list})")
        };
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM scheduled_runs {filter} \
             ORDER BY updated_at DESC, rowid DESC LIMIT ?1"
        );
        self.query_runs(&sql, params![limit_to_sql(limit)])
    }

    fn find_by_id(&self, id: &str) -> Result<Option<ScheduledRun>, TimelineError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {RUN_COLUMNS} FROM scheduled_runs WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_run).optional()?)
    }

    fn find_by_topic(
        &self,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<ScheduledRun>, TimelineError> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM scheduled_runs WHERE topic = ?1 \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        );
        self.query_runs(&sql, params![topic, limit_to_sql(limit)])
    }

    fn failed(&self, limit: usize) -> Result<Vec<ScheduledRun>, TimelineError> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM scheduled_runs WHERE status = 'failed' \
             ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        );
        self.query_runs(&sql, params![limit_to_sql(limit)])
    }

    fn active_runs(&self) -> Result<Vec<ScheduledRun>, TimelineError> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM scheduled_runs \
             WHERE status IN ('scheduled', 'executing') \
             ORDER BY created_at DESC, rowid DESC"
        );
        self.query_runs(&sql, [])
    }

    fn statistics(
        &self,
        period_days: u32,
        now: DateTime<Utc>,
    ) -> Result<RunStatistics, TimelineError> {
        let since = to_millis(days_before(now, period_days));
        let conn = self.lock()?;

        let mut stats = RunStatistics {
            period_days,
            ..RunStatistics::default()
        };

        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM scheduled_runs WHERE created_at >= ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for r in rows {
            let (status, count) = r?;
            let count = u64::try_from(count).unwrap_or_default();
            stats.total_runs = stats.total_runs.saturating_add(count);
            match status.parse::<RunStatus>() {
                Ok(RunStatus::Completed) => stats.completed_runs = count,
                Ok(RunStatus::Failed) => stats.failed_runs = count,
                Ok(RunStatus::Cancelled) => stats.cancelled_runs = count,
                Ok(RunStatus::Scheduled) => stats.scheduled_runs = count,
                Ok(RunStatus::Executing) => {}
                Err(e) => return Err(TimelineError::Corrupt(e)),
            }
        }

        let avg: Option<f64> = conn.query_row(
            "SELECT AVG(execution_duration_ms) FROM scheduled_runs \
             WHERE status = 'completed' AND execution_duration_ms IS NOT NULL AND created_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;

        if stats.total_runs > 0 {
            stats.success_rate = stats.completed_runs as f64 / stats.total_runs as f64 * 100.0;
        }
        stats.average_execution_duration_ms = avg.map(|a| a.max(0.0) as u64).unwrap_or_default();

        Ok(stats)
    }

    fn count_with_status_since(
        &self,
        status: RunStatus,
        since: DateTime<Utc>,
    ) -> Result<u64, TimelineError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_runs WHERE status = ?1 AND created_at >= ?2",
            params![status.as_str(), to_millis(since)],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TimelineError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM scheduled_runs \
             WHERE created_at < ?1 AND status IN ('completed', 'failed', 'cancelled')",
            params![to_millis(cutoff)],
        )?;
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Statement helpers shared by plain and transactional paths
// ---------------------------------------------------------------------------

fn insert_run(conn: &Connection, run: &ScheduledRun) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO scheduled_runs \
         (id, scheduled_time, actual_execution_time, reason, topic, details, status, \
          error_message, execution_duration_ms, result_payload, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            run.id,
            to_millis(run.scheduled_time),
            run.actual_execution_time.map(to_millis),
            run.reason,
            run.topic,
            run.details,
            run.status.as_str(),
            run.error_message,
            run.execution_duration_ms.map(duration_to_sql),
            run.result_payload,
            to_millis(run.created_at),
            to_millis(run.updated_at),
        ],
    )
}

fn cancel_scheduled(conn: &Connection, at: DateTime<Utc>) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE scheduled_runs SET status = 'cancelled', updated_at = ?1 WHERE status = 'scheduled'",
        params![to_millis(at)],
    )
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledRun> {
    let status_str: String = row.get(6)?;
    let status = status_str
        .parse::<RunStatus>()
        .map_err(|e| conversion_error(6, e))?;
    let duration: Option<i64> = row.get(8)?;

    Ok(ScheduledRun {
        id: row.get(0)?,
        scheduled_time: from_millis(1, row.get(1)?)?,
        actual_execution_time: row
            .get::<_, Option<i64>>(2)?
            .map(|ms| from_millis(2, ms))
            .transpose()?,
        reason: row.get(3)?,
        topic: row.get(4)?,
        details: row.get(5)?,
        status,
        error_message: row.get(7)?,
        execution_duration_ms: duration.and_then(|d| u64::try_from(d).ok()),
        result_payload: row.get(9)?,
        created_at: from_millis(10, row.get(10)?)?,
        updated_at: from_millis(11, row.get(11)?)?,
    })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(TimelineError::Corrupt(message)),
    )
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(column: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(column, format!("timestamp out of range: {ms}")))
}

fn duration_to_sql(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn limit_to_sql(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
