use std::sync::Arc;

use cadence_core::config::BreakerConfig;
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::{error, instrument, warn};

use crate::db::{lock, Db};
use crate::error::{Result, SchedulerError};
use crate::tasks::TaskStore;

/// What a reported failure did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Failure recorded; the task stays enabled.
    Counted { failures: u32 },
    /// Threshold exceeded: the task was disabled and its counter reset.
    Tripped { failures: u32 },
}

/// Consecutive-failure counter per periodic task, kept in the shared store
/// so every worker sees the same count.
pub struct FailureCounter {
    db: Db,
    tasks: Arc<TaskStore>,
    config: BreakerConfig,
}

impl FailureCounter {
    pub fn new(db: Db, tasks: Arc<TaskStore>, config: BreakerConfig) -> Self {
        Self { db, tasks, config }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Any success clears the streak.
    #[instrument(skip(self))]
    pub fn on_success(&self, task_name: &str) -> Result<()> {
        let conn = lock(&self.db)?;
        conn.execute(
            "UPDATE failure_counters SET consecutive_failures = 0 WHERE task_name = ?1",
            [task_name],
        )?;
        Ok(())
    }

    /// Count a terminal failure and disable the task once the streak exceeds
    /// `max_retries` (when auto-disable is on).
    #[instrument(skip(self, error))]
    pub fn on_failure(&self, task_name: &str, error: &str) -> Result<FailureOutcome> {
        // Single statement: concurrent failures from other workers cannot
        // lose an increment, and a late report for a deleted task counts
        // nothing.
        let failures: Option<u32> = {
            let conn = lock(&self.db)?;
            conn.query_row(
                "INSERT INTO failure_counters (task_name, consecutive_failures)
                 SELECT ?1, 1 WHERE EXISTS (SELECT 1 FROM periodic_tasks WHERE name = ?1)
                 ON CONFLICT (task_name)
                 DO UPDATE SET consecutive_failures = consecutive_failures + 1
                 RETURNING consecutive_failures",
                [task_name],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(failures) = failures else {
            warn!(task = task_name, %error, "failure reported for unknown task; not counted");
            return Err(SchedulerError::NotFound {
                name: task_name.to_string(),
            });
        };
        error!(task = task_name, failures, %error, "periodic task failed");

        if !self.config.auto_disable || failures <= self.config.max_retries {
            return Ok(FailureOutcome::Counted { failures });
        }

        warn!(
            task = task_name,
            failures,
            max_retries = self.config.max_retries,
            "too many consecutive failures; disabling task"
        );
        let disabled = self.tasks.set_enabled(task_name, false);
        self.reset(task_name)?;
        disabled?;
        Ok(FailureOutcome::Tripped { failures })
    }

    /// Current streak; zero for tasks that never failed.
    pub fn consecutive_failures(&self, task_name: &str) -> Result<u32> {
        let conn = lock(&self.db)?;
        let failures = conn
            .query_row(
                "SELECT consecutive_failures FROM failure_counters WHERE task_name = ?1",
                [task_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(failures.unwrap_or(0))
    }

    fn reset(&self, task_name: &str) -> Result<()> {
        self.on_success(task_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScheduleKind;
    use crate::registry::StaticRegistry;
    use crate::store::ScheduleStore;
    use crate::types::TaskSpec;
    use chrono_tz::Tz;
    use rusqlite::Connection;
    use serde_json::json;

    fn counter(max_retries: u32, auto_disable: bool) -> (Arc<TaskStore>, FailureCounter) {
        let db = crate::db::open(Connection::open_in_memory().unwrap()).unwrap();
        let schedules = Arc::new(ScheduleStore::new(db.clone(), Tz::UTC));
        let tasks = Arc::new(TaskStore::new(
            db.clone(),
            schedules.clone(),
            Arc::new(StaticRegistry::new(["noop"])),
        ));
        let schedule = schedules
            .resolve(
                ScheduleKind::Interval,
                json!({"every": 1, "period": "minutes"}).as_object().unwrap(),
            )
            .unwrap();
        tasks.create(&TaskSpec::new("t1", "noop"), &schedule).unwrap();

        let config = BreakerConfig {
            max_retries,
            auto_disable,
        };
        (tasks.clone(), FailureCounter::new(db, tasks, config))
    }

    #[test]
    fn trips_after_max_retries_plus_one() {
        let (tasks, counter) = counter(3, true);
        for expected in 1..=3 {
            assert_eq!(
                counter.on_failure("t1", "boom").unwrap(),
                FailureOutcome::Counted { failures: expected }
            );
            assert!(tasks.get("t1").unwrap().enabled);
        }
        assert_eq!(
            counter.on_failure("t1", "boom").unwrap(),
            FailureOutcome::Tripped { failures: 4 }
        );
        assert!(!tasks.get("t1").unwrap().enabled);
        assert_eq!(counter.consecutive_failures("t1").unwrap(), 0);
    }

    #[test]
    fn success_between_failures_resets_streak() {
        let (tasks, counter) = counter(3, true);
        for _ in 0..3 {
            counter.on_failure("t1", "boom").unwrap();
        }
        counter.on_success("t1").unwrap();
        for _ in 0..3 {
            counter.on_failure("t1", "boom").unwrap();
        }
        assert!(tasks.get("t1").unwrap().enabled);
        assert_eq!(counter.consecutive_failures("t1").unwrap(), 3);
    }

    #[test]
    fn without_auto_disable_the_count_keeps_growing() {
        let (tasks, counter) = counter(1, false);
        for _ in 0..5 {
            counter.on_failure("t1", "boom").unwrap();
        }
        assert!(tasks.get("t1").unwrap().enabled);
        assert_eq!(counter.consecutive_failures("t1").unwrap(), 5);
    }

    #[test]
    fn success_on_unknown_task_is_harmless() {
        let (_, counter) = counter(3, true);
        counter.on_success("never-failed").unwrap();
        assert_eq!(counter.consecutive_failures("never-failed").unwrap(), 0);
    }

    #[test]
    fn deleting_task_drops_counter() {
        let (tasks, counter) = counter(3, true);
        counter.on_failure("t1", "boom").unwrap();
        tasks.delete("t1").unwrap();
        assert_eq!(counter.consecutive_failures("t1").unwrap(), 0);
    }

    #[test]
    fn failure_after_delete_is_not_counted() {
        let (tasks, counter) = counter(2, true);
        tasks.delete("t1").unwrap();
        for _ in 0..3 {
            let err = counter.on_failure("t1", "late").unwrap_err();
            assert!(matches!(err, SchedulerError::NotFound { ref name } if name == "t1"));
        }
        assert_eq!(counter.consecutive_failures("t1").unwrap(), 0);
    }
}
