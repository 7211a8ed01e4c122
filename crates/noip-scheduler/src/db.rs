use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job store schema in `conn`.
///
/// One row per job id. `synchronous=FULL` plus WAL means a committed write
/// survives a crash, and an interrupted one leaves the previous row intact.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=FULL;

        CREATE TABLE IF NOT EXISTS jobs (
            id               TEXT    NOT NULL PRIMARY KEY,
            interval_minutes INTEGER NOT NULL CHECK (interval_minutes > 0),
            arguments        TEXT    NOT NULL,   -- JSON array, opaque to the store
            next_fire_time   TEXT,               -- ISO-8601 or NULL
            max_instances    INTEGER NOT NULL DEFAULT 1,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
