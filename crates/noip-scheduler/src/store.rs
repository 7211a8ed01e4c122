use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{Job, UpdateArgs},
};

/// What [`JobStore::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// A row with the same id existed and `replace_existing` was false.
    Kept,
}

/// Durable SQLite-backed storage for job definitions.
///
/// There is a single writer (the engine's thread of control), so the
/// connection is owned outright rather than shared behind a `Mutex`.
pub struct JobStore {
    conn: Connection,
    flushes: u32,
}

impl JobStore {
    /// Open (or create) the store at `path`, creating the parent directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!(path = %path.display(), "opening job store");
        Self::new(Connection::open(path)?)
    }

    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn, flushes: 0 })
    }

    /// Open an existing store without creating, migrating or locking it for writes.
    ///
    /// Used for inspection; any write through the returned store fails.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn, flushes: 0 })
    }

    /// Read the job with `id`, or `None` if it has never been registered.
    pub fn load(&self, id: &str) -> Result<Option<Job>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, interval_minutes, arguments, next_fire_time, max_instances
                 FROM jobs WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,         // id
                        row.get::<_, u32>(1)?,            // interval_minutes
                        row.get::<_, String>(2)?,         // arguments JSON
                        row.get::<_, Option<String>>(3)?, // next_fire_time
                        row.get::<_, u32>(4)?,            // max_instances
                    ))
                },
            )
            .optional()?;

        let Some((id, interval_minutes, args_json, next_fire, max_instances)) = row else {
            return Ok(None);
        };

        let arguments: UpdateArgs =
            serde_json::from_str(&args_json).map_err(|e| SchedulerError::Corrupt {
                id: id.clone(),
                reason: format!("arguments: {e}"),
            })?;
        let next_fire_time = next_fire
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| SchedulerError::Corrupt {
                        id: id.clone(),
                        reason: format!("next_fire_time {s:?}: {e}"),
                    })
            })
            .transpose()?;

        Ok(Some(Job {
            id,
            interval_minutes,
            arguments,
            next_fire_time,
            max_instances,
        }))
    }

    /// Insert `job`, or overwrite the stored row when `replace_existing` is set.
    ///
    /// With `replace_existing = false` an existing row is left untouched, which
    /// is what keeps restarts from resetting the schedule.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn upsert(&mut self, job: &Job, replace_existing: bool) -> Result<UpsertOutcome> {
        if job.interval_minutes == 0 {
            return Err(SchedulerError::InvalidJob(
                "interval_minutes must be positive".to_string(),
            ));
        }
        let args_json = serde_json::to_string(&job.arguments)?;
        let next = job.next_fire_time.map(|dt| dt.to_rfc3339());
        let now = Utc::now().to_rfc3339();

        // Dropping the transaction without commit rolls it back, so every
        // early return below leaves the previous row in place.
        let tx = self.conn.transaction()?;
        let exists = tx
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", [&job.id], |_| Ok(()))
            .optional()?
            .is_some();

        let outcome = match (exists, replace_existing) {
            (true, false) => UpsertOutcome::Kept,
            (true, true) => {
                tx.execute(
                    "UPDATE jobs SET interval_minutes=?2, arguments=?3, next_fire_time=?4,
                      max_instances=?5, updated_at=?6
                     WHERE id=?1",
                    rusqlite::params![
                        job.id,
                        job.interval_minutes,
                        args_json,
                        next,
                        job.max_instances,
                        now
                    ],
                )?;
                UpsertOutcome::Replaced
            }
            (false, _) => {
                tx.execute(
                    "INSERT INTO jobs
                     (id, interval_minutes, arguments, next_fire_time, max_instances,
                      created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?6)",
                    rusqlite::params![
                        job.id,
                        job.interval_minutes,
                        args_json,
                        next,
                        job.max_instances,
                        now
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };
        tx.commit()?;

        debug!(?outcome, "job upserted");
        Ok(outcome)
    }

    /// Number of rows with `id`: 0 or 1 by the primary key.
    pub fn count(&self, id: &str) -> Result<u32> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM jobs WHERE id = ?1", [id], |row| {
                row.get(0)
            })?)
    }

    /// Move everything committed so far from the WAL into the main database file.
    pub fn flush(&mut self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .optional()?;
        self.flushes += 1;
        debug!(flushes = self.flushes, "job store flushed");
        Ok(())
    }

    /// How many times [`JobStore::flush`] has succeeded on this handle.
    pub fn flush_count(&self) -> u32 {
        self.flushes
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
