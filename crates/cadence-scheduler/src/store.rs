use std::collections::HashSet;

use chrono::Utc;
use chrono_tz::Tz;
use rusqlite::OptionalExtension;
use tracing::{debug, info, instrument};

use crate::catalog::ScheduleKind;
use crate::db::{lock, Db};
use crate::error::{Result, SchedulerError};
use crate::schedule::{Fields, ScheduleSpec};
use crate::types::Schedule;

/// Persists schedules keyed by their canonical content key, so identical
/// schedules are shared rather than duplicated.
pub struct ScheduleStore {
    db: Db,
    /// Zone for naive timestamps in clocked schedules.
    tz: Tz,
}

impl ScheduleStore {
    pub fn new(db: Db, tz: Tz) -> Self {
        Self { db, tz }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Validate `fields` against `kind` without touching the store.
    pub fn validate(&self, kind: ScheduleKind, fields: &Fields) -> Result<ScheduleSpec> {
        ScheduleSpec::from_fields(kind, fields, self.tz)
    }

    /// Validate then get-or-create.
    #[instrument(skip_all, fields(kind = %kind))]
    pub fn resolve(&self, kind: ScheduleKind, fields: &Fields) -> Result<Schedule> {
        let spec = self.validate(kind, fields)?;
        self.resolve_spec(&spec)
    }

    /// Atomic get-or-create of an already-validated schedule.
    ///
    /// The primary key is the content key, so concurrent resolvers of the
    /// same value collapse onto one row: the loser's insert is ignored and
    /// both read back the same record.
    pub fn resolve_spec(&self, spec: &ScheduleSpec) -> Result<Schedule> {
        let id = spec.canonical_key()?;
        let spec_json = serde_json::to_string(spec)?;
        let now = Utc::now().to_rfc3339();

        let conn = lock(&self.db)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO schedules (id, kind, spec, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, spec.kind().as_str(), spec_json, now],
        )?;
        if inserted > 0 {
            info!(schedule_id = %id, kind = %spec.kind(), schedule = %spec, "schedule created");
        } else {
            debug!(schedule_id = %id, "schedule reused");
        }

        let schedule = conn.query_row(
            "SELECT id, spec, created_at FROM schedules WHERE id = ?1",
            [&id],
            row_to_schedule,
        )?;
        Ok(schedule)
    }

    pub fn get(&self, id: &str) -> Result<Option<Schedule>> {
        let conn = lock(&self.db)?;
        let schedule = conn
            .query_row(
                "SELECT id, spec, created_at FROM schedules WHERE id = ?1",
                [id],
                row_to_schedule,
            )
            .optional()?;
        Ok(schedule)
    }

    /// Reverse lookup for callers holding only a schedule id.
    pub fn kind_of(&self, id: &str) -> Result<ScheduleKind> {
        let conn = lock(&self.db)?;
        let kind: Option<String> = conn
            .query_row("SELECT kind FROM schedules WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match kind {
            Some(kind) => kind.parse(),
            None => Err(SchedulerError::ScheduleNotFound { id: id.to_string() }),
        }
    }

    /// All stored schedules ordered by creation time.
    pub fn list(&self) -> Result<Vec<Schedule>> {
        let conn = lock(&self.db)?;
        let mut stmt =
            conn.prepare("SELECT id, spec, created_at FROM schedules ORDER BY created_at, id")?;
        let schedules = stmt
            .query_map([], row_to_schedule)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(schedules)
    }

    /// Delete every schedule no periodic task references. Returns the number
    /// of schedules removed.
    ///
    /// Each delete re-checks the reference in the same statement, so a task
    /// attached after the candidate list was built keeps its schedule. A
    /// schedule resolved but not yet attached may still be collected; the
    /// next resolve recreates it.
    #[instrument(skip(self))]
    pub fn garbage_collect(&self) -> Result<usize> {
        let conn = lock(&self.db)?;

        let all: Vec<String> = {
            let mut stmt = conn.prepare("SELECT id FROM schedules")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            ids
        };
        let referenced: HashSet<String> = {
            let mut stmt = conn.prepare("SELECT DISTINCT schedule_id FROM periodic_tasks")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            ids
        };

        let mut removed = 0;
        for id in all.iter().filter(|id| !referenced.contains(*id)) {
            removed += conn.execute(
                "DELETE FROM schedules
                 WHERE id = ?1
                   AND NOT EXISTS (SELECT 1 FROM periodic_tasks WHERE schedule_id = ?1)",
                [id],
            )?;
        }

        if removed > 0 {
            info!(removed, scanned = all.len(), "unused schedules collected");
        } else {
            debug!(scanned = all.len(), "no unused schedules");
        }
        Ok(removed)
    }
}

pub(crate) fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let spec_json: String = row.get(1)?;
    let spec: ScheduleSpec = serde_json::from_str(&spec_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Schedule {
        id: row.get(0)?,
        spec,
        created_at: row.get(2)?,
    })
}
