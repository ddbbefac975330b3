use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::{Result, SchedulerError};

/// Handle to the shared store. Every component gets a clone instead of
/// reaching for global state.
pub type Db = Arc<Mutex<Connection>>;

/// Wrap an open connection, initialising the schema first.
pub fn open(conn: Connection) -> Result<Db> {
    // Referenced schedules must never be deleted out from under a task.
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(db: &Db) -> Result<MutexGuard<'_, Connection>> {
    db.lock()
        .map_err(|_| SchedulerError::Internal("database mutex poisoned".to_string()))
}

/// Initialise the scheduler schema in `conn`.
///
/// Idempotent. `schedules.id` is the canonical content key of the schedule,
/// so the primary key itself enforces one row per distinct (kind, fields).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id          TEXT    NOT NULL PRIMARY KEY,   -- sha256(kind + normalized fields)
            kind        TEXT    NOT NULL,
            spec        TEXT    NOT NULL,               -- JSON-encoded ScheduleSpec
            created_at  TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS periodic_tasks (
            name            TEXT    NOT NULL PRIMARY KEY,
            target          TEXT    NOT NULL,
            args            TEXT    NOT NULL DEFAULT '[]',   -- JSON array
            kwargs          TEXT    NOT NULL DEFAULT '{}',   -- JSON object
            enabled         INTEGER NOT NULL DEFAULT 1,
            one_off         INTEGER NOT NULL DEFAULT 0,
            priority        INTEGER,
            start_time      TEXT,
            expires         TEXT,
            schedule_id     TEXT    NOT NULL REFERENCES schedules (id) ON DELETE RESTRICT,
            total_run_count INTEGER NOT NULL DEFAULT 0,
            last_run_at     TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        -- Collector lookups: which schedules are still referenced.
        CREATE INDEX IF NOT EXISTS idx_periodic_tasks_schedule ON periodic_tasks (schedule_id);

        -- A counter never outlives its task.
        CREATE TABLE IF NOT EXISTS failure_counters (
            task_name            TEXT    NOT NULL PRIMARY KEY
                                 REFERENCES periodic_tasks (name) ON DELETE CASCADE,
            consecutive_failures INTEGER NOT NULL DEFAULT 0
        ) STRICT;
        ",
    )?;
    Ok(())
}
