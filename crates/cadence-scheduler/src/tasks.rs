use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{ffi, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use crate::catalog::ScheduleKind;
use crate::db::{lock, Db};
use crate::error::{Result, SchedulerError};
use crate::registry::ExecutableRegistry;
use crate::store::ScheduleStore;
use crate::types::{PeriodicTask, Schedule, TaskSpec, TaskSummary};

const TASK_SELECT_SQL: &str = "SELECT name, target, args, kwargs, enabled, one_off, priority,
        start_time, expires, schedule_id, total_run_count, last_run_at, created_at, updated_at
 FROM periodic_tasks";

/// Persists periodic-task definitions and enforces their creation
/// invariants.
pub struct TaskStore {
    db: Db,
    schedules: Arc<ScheduleStore>,
    registry: Arc<dyn ExecutableRegistry>,
}

impl TaskStore {
    pub fn new(db: Db, schedules: Arc<ScheduleStore>, registry: Arc<dyn ExecutableRegistry>) -> Self {
        Self {
            db,
            schedules,
            registry,
        }
    }

    pub fn registry(&self) -> &dyn ExecutableRegistry {
        self.registry.as_ref()
    }

    /// Check everything `create` checks, without writing. Lets callers
    /// reject a task before resolving (and persisting) its schedule.
    pub fn check(&self, spec: &TaskSpec, kind: ScheduleKind) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(SchedulerError::field("name", "must not be empty"));
        }
        if !self.registry.is_registered(&spec.target) {
            return Err(SchedulerError::UnknownTarget {
                target: spec.target.clone(),
            });
        }
        if spec.one_off && kind != ScheduleKind::Clocked {
            return Err(SchedulerError::InvalidOneOff {
                kind: kind.to_string(),
            });
        }
        if let (Some(start), Some(expires)) = (spec.start_time, spec.expires) {
            if expires <= start {
                return Err(SchedulerError::field("expires", "must be after start_time"));
            }
        }
        if self.exists(&spec.name)? {
            return Err(SchedulerError::DuplicateName {
                name: spec.name.clone(),
            });
        }
        Ok(())
    }

    /// Persist a new task bound to `schedule`.
    #[instrument(skip(self, spec, schedule), fields(name = %spec.name, target = %spec.target))]
    pub fn create(&self, spec: &TaskSpec, schedule: &Schedule) -> Result<PeriodicTask> {
        self.check(spec, schedule.kind())?;

        let now = Utc::now().to_rfc3339();
        let args = serde_json::to_string(&spec.args)?;
        let kwargs = serde_json::to_string(&spec.kwargs)?;

        let conn = lock(&self.db)?;
        let inserted = conn.execute(
            "INSERT INTO periodic_tasks
             (name, target, args, kwargs, enabled, one_off, priority, start_time, expires,
              schedule_id, total_run_count, last_run_at, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,0,NULL,?11,?11)",
            rusqlite::params![
                spec.name,
                spec.target,
                args,
                kwargs,
                spec.enabled,
                spec.one_off,
                spec.priority,
                spec.start_time.map(|t| t.to_rfc3339()),
                spec.expires.map(|t| t.to_rfc3339()),
                schedule.id,
                now,
            ],
        );

        // `check` ran outside this lock; the constraints decide the race.
        if let Err(rusqlite::Error::SqliteFailure(e, _)) = &inserted {
            match e.extended_code {
                ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return Err(SchedulerError::DuplicateName {
                        name: spec.name.clone(),
                    })
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return Err(SchedulerError::ScheduleGone {
                        id: schedule.id.clone(),
                    })
                }
                _ => {}
            }
        }
        inserted?;

        info!(schedule_id = %schedule.id, schedule = %schedule.spec, "periodic task created");

        Ok(PeriodicTask {
            name: spec.name.clone(),
            target: spec.target.clone(),
            args: spec.args.clone(),
            kwargs: spec.kwargs.clone(),
            enabled: spec.enabled,
            one_off: spec.one_off,
            priority: spec.priority,
            start_time: spec.start_time,
            expires: spec.expires,
            schedule_id: schedule.id.clone(),
            total_run_count: 0,
            last_run_at: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Remove a task, then collect schedules left without a task. Its
    /// failure counter goes with it (`ON DELETE CASCADE`).
    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> Result<()> {
        {
            let conn = lock(&self.db)?;
            let n = conn.execute("DELETE FROM periodic_tasks WHERE name = ?1", [name])?;
            if n == 0 {
                return Err(SchedulerError::NotFound {
                    name: name.to_string(),
                });
            }
        }
        info!("periodic task deleted");

        // The task is gone either way; a failed pass is retried by the collector.
        if let Err(e) = self.schedules.garbage_collect() {
            warn!(error = %e, "schedule collection after delete failed");
        }
        Ok(())
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        let conn = lock(&self.db)?;
        let found = conn
            .query_row(
                "SELECT 1 FROM periodic_tasks WHERE name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get(&self, name: &str) -> Result<PeriodicTask> {
        let conn = lock(&self.db)?;
        conn.query_row(
            &format!("{TASK_SELECT_SQL} WHERE name = ?1"),
            [name],
            row_to_task,
        )
        .optional()?
        .ok_or_else(|| SchedulerError::NotFound {
            name: name.to_string(),
        })
    }

    /// All tasks ordered by creation time.
    pub fn list(&self) -> Result<Vec<PeriodicTask>> {
        let conn = lock(&self.db)?;
        let mut stmt = conn.prepare(&format!("{TASK_SELECT_SQL} ORDER BY created_at, name"))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    /// Tasks joined with their schedule and current failure count.
    pub fn summaries(&self) -> Result<Vec<TaskSummary>> {
        let conn = lock(&self.db)?;
        let mut stmt = conn.prepare(
            "SELECT t.name, t.target, t.args, t.kwargs, t.enabled, t.one_off, t.priority,
                    t.start_time, t.expires, t.schedule_id, t.total_run_count, t.last_run_at,
                    t.created_at, t.updated_at,
                    s.id, s.spec, s.created_at,
                    COALESCE(f.consecutive_failures, 0)
             FROM periodic_tasks t
             JOIN schedules s ON s.id = t.schedule_id
             LEFT JOIN failure_counters f ON f.task_name = t.name
             ORDER BY t.created_at, t.name",
        )?;
        let summaries = stmt
            .query_map([], |row| {
                let task = row_to_task(row)?;
                let spec_json: String = row.get(15)?;
                let spec: crate::schedule::ScheduleSpec = serde_json::from_str(&spec_json)
                    .map_err(|e| conversion_failure(15, e))?;
                Ok(TaskSummary {
                    task,
                    schedule_kind: spec.kind(),
                    schedule: spec.summary(),
                    consecutive_failures: row.get(17)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(summaries)
    }

    /// Flip the enabled flag. Idempotent.
    #[instrument(skip(self))]
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = lock(&self.db)?;
        let n = conn.execute(
            "UPDATE periodic_tasks SET enabled = ?1, updated_at = ?2 WHERE name = ?3",
            rusqlite::params![enabled, now, name],
        )?;
        if n == 0 {
            return Err(SchedulerError::NotFound {
                name: name.to_string(),
            });
        }
        debug!("enabled flag updated");
        Ok(())
    }

    /// Bookkeeping for a successful run: bump the run count and stamp the
    /// time. One-off tasks are disabled after their run.
    #[instrument(skip(self))]
    pub fn record_run(&self, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = lock(&self.db)?;
        let n = conn.execute(
            "UPDATE periodic_tasks
             SET total_run_count = total_run_count + 1,
                 last_run_at     = ?1,
                 enabled         = CASE WHEN one_off = 1 THEN 0 ELSE enabled END,
                 updated_at      = ?1
             WHERE name = ?2",
            rusqlite::params![now, name],
        )?;
        if n == 0 {
            return Err(SchedulerError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_time(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_failure(idx, e))
    })
    .transpose()
}

/// Map a row (column order from TASK_SELECT_SQL) to a PeriodicTask.
fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeriodicTask> {
    let args: String = row.get(2)?;
    let kwargs: String = row.get(3)?;
    Ok(PeriodicTask {
        name: row.get(0)?,
        target: row.get(1)?,
        args: serde_json::from_str(&args).map_err(|e| conversion_failure(2, e))?,
        kwargs: serde_json::from_str(&kwargs).map_err(|e| conversion_failure(3, e))?,
        enabled: row.get::<_, i64>(4)? != 0,
        one_off: row.get::<_, i64>(5)? != 0,
        priority: row
            .get::<_, Option<i64>>(6)?
            .and_then(|p| u8::try_from(p).ok()),
        start_time: parse_time(7, row.get(7)?)?,
        expires: parse_time(8, row.get(8)?)?,
        schedule_id: row.get(9)?,
        total_run_count: row.get(10)?,
        last_run_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}
