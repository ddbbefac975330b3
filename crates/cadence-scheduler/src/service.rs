use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::{BreakerConfig, CadenceConfig};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::breaker::{FailureCounter, FailureOutcome};
use crate::catalog::kind_of;
use crate::db::{self, Db};
use crate::engine::ScheduleCollector;
use crate::error::{Result, SchedulerError};
use crate::guard::{ExecutionGuard, LiveRuns};
use crate::registry::{ExecutableRegistry, StaticRegistry};
use crate::schedule::Fields;
use crate::store::ScheduleStore;
use crate::tasks::TaskStore;
use crate::types::{PeriodicTask, TaskSpec, TaskSummary};

/// A create-task request: the task attributes plus the schedule it should
/// run on, still in raw field form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub task: TaskSpec,
    pub schedule_kind: String,
    #[serde(default)]
    pub schedule_fields: Fields,
}

/// Procedure-call surface over the stores, the execution guard and the
/// failure counter. Protocol layers (CLI, REST, RPC) sit on top of this.
pub struct SchedulerService {
    schedules: Arc<ScheduleStore>,
    tasks: Arc<TaskStore>,
    guard: ExecutionGuard,
    failures: FailureCounter,
}

impl SchedulerService {
    pub fn new(
        db: Db,
        tz: Tz,
        registry: Arc<dyn ExecutableRegistry>,
        live: Arc<dyn LiveRuns>,
        breaker: BreakerConfig,
    ) -> Self {
        let schedules = Arc::new(ScheduleStore::new(db.clone(), tz));
        let tasks = Arc::new(TaskStore::new(db.clone(), schedules.clone(), registry));
        let failures = FailureCounter::new(db, tasks.clone(), breaker);
        Self {
            schedules,
            tasks,
            guard: ExecutionGuard::new(live),
            failures,
        }
    }

    /// Build from loaded config; executables come from `config.executables`.
    pub fn from_config(
        conn: Connection,
        config: &CadenceConfig,
        live: Arc<dyn LiveRuns>,
    ) -> Result<Self> {
        let db = db::open(conn)?;
        let registry = Arc::new(StaticRegistry::new(config.executables.iter().cloned()));
        Ok(Self::new(db, config.tz()?, registry, live, config.breaker))
    }

    pub fn schedules(&self) -> &Arc<ScheduleStore> {
        &self.schedules
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn failures(&self) -> &FailureCounter {
        &self.failures
    }

    /// Resolve the schedule (get-or-create) and bind a new task to it.
    ///
    /// Everything that can be checked up front is checked before the
    /// schedule is persisted, so most rejections leave no schedule behind.
    #[instrument(skip(self, req), fields(name = %req.task.name, kind = %req.schedule_kind))]
    pub fn create_task(&self, req: &CreateTask) -> Result<PeriodicTask> {
        let kind = kind_of(&req.schedule_kind)?;
        let spec = self.schedules.validate(kind, &req.schedule_fields)?;
        self.tasks.check(&req.task, kind)?;

        let schedule = self.schedules.resolve_spec(&spec)?;
        match self.tasks.create(&req.task, &schedule) {
            // A collection pass slipped in between resolve and insert.
            Err(SchedulerError::ScheduleGone { id }) => {
                debug!(schedule_id = %id, "schedule collected mid-create; resolving again");
                let schedule = self.schedules.resolve_spec(&spec)?;
                self.tasks.create(&req.task, &schedule)
            }
            other => other,
        }
    }

    pub fn delete_task(&self, name: &str) -> Result<()> {
        self.tasks.delete(name)
    }

    pub fn list_tasks(&self) -> Result<Vec<TaskSummary>> {
        self.tasks.summaries()
    }

    pub fn list_executables(&self) -> Vec<String> {
        self.tasks.registry().list_registered()
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.tasks.set_enabled(name, enabled)?;
        info!(task = name, enabled, "periodic task toggled");
        Ok(())
    }

    pub fn garbage_collect(&self) -> Result<usize> {
        self.schedules.garbage_collect()
    }

    /// Admission check before a task body starts. `AlreadyRunning` means
    /// skip this run; it is not reported as a failure.
    pub async fn begin_run(&self, task_name: &str, run_id: &str) -> Result<()> {
        self.guard.begin(task_name, run_id).await
    }

    /// A run finished successfully.
    pub fn report_success(&self, task_name: &str) -> Result<()> {
        self.failures.on_success(task_name)?;
        self.tasks.record_run(task_name)
    }

    /// A run failed terminally (after the worker pool's own retries, or on
    /// its timeout).
    pub fn report_failure(&self, task_name: &str, error: &str) -> Result<FailureOutcome> {
        self.failures.on_failure(task_name, error)
    }

    /// Background collector over this service's schedule store.
    pub fn collector(&self, every: Duration) -> ScheduleCollector {
        ScheduleCollector::new(self.schedules.clone(), every)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::LocalRunRegistry;
    use serde_json::json;

    fn service() -> SchedulerService {
        let mut config = CadenceConfig::default();
        config.executables = vec!["noop".to_string()];
        SchedulerService::from_config(
            Connection::open_in_memory().unwrap(),
            &config,
            Arc::new(LocalRunRegistry::new()),
        )
        .unwrap()
    }

    fn request(name: &str, kind: &str, fields: serde_json::Value) -> CreateTask {
        CreateTask {
            task: TaskSpec::new(name, "noop"),
            schedule_kind: kind.to_string(),
            schedule_fields: fields.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn invalid_kind_is_reported() {
        let err = service()
            .create_task(&request("t1", "lunar", json!({})))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_KIND");
    }

    #[test]
    fn rejected_task_leaves_no_schedule() {
        let svc = service();
        let mut req = request("t1", "interval", json!({"every": 20, "period": "seconds"}));
        req.task.one_off = true;
        let err = svc.create_task(&req).unwrap_err();
        assert_eq!(err.code(), "INVALID_ONE_OFF");
        assert!(svc.schedules().list().unwrap().is_empty());
    }

    #[test]
    fn executables_come_from_config() {
        assert_eq!(service().list_executables(), vec!["noop".to_string()]);
    }

    #[test]
    fn report_success_records_run() {
        let svc = service();
        svc.create_task(&request("t1", "crontab", json!({"minute": "*/5"})))
            .unwrap();
        svc.report_success("t1").unwrap();
        let listed = svc.list_tasks().unwrap();
        assert_eq!(listed[0].task.total_run_count, 1);
    }

    #[test]
    fn create_request_deserializes_with_defaults() {
        let req: CreateTask = serde_json::from_value(json!({
            "task": {"name": "t1", "target": "noop"},
            "schedule_kind": "solar",
            "schedule_fields": {"event": "sunset", "latitude": -37.81753, "longitude": 144.96715}
        }))
        .unwrap();
        assert!(req.task.enabled);
        assert!(!req.task.one_off);
        assert!(service().create_task(&req).is_ok());
    }
}
