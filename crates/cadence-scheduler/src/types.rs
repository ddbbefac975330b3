use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::ScheduleKind;
use crate::schedule::ScheduleSpec;

/// A persisted schedule. `id` is the canonical content key of `spec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub spec: ScheduleSpec,
    /// ISO-8601 timestamp of first resolution.
    pub created_at: String,
}

impl Schedule {
    pub fn kind(&self) -> ScheduleKind {
        self.spec.kind()
    }
}

/// Caller-supplied attributes of a periodic task, before it is bound to a
/// schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Globally unique task name.
    pub name: String,
    /// Registered executable to invoke.
    pub target: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Run once, then disable. Only valid against a clocked schedule.
    #[serde(default)]
    pub one_off: bool,
    pub priority: Option<u8>,
    pub start_time: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
}

fn bool_true() -> bool {
    true
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            enabled: true,
            one_off: false,
            priority: None,
            start_time: None,
            expires: None,
        }
    }
}

/// A persisted periodic task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicTask {
    pub name: String,
    pub target: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub enabled: bool,
    pub one_off: bool,
    pub priority: Option<u8>,
    pub start_time: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    /// Canonical key of the bound schedule.
    pub schedule_id: String,
    /// Number of successful runs.
    pub total_run_count: u32,
    /// ISO-8601 timestamp of the most recent successful run, if any.
    pub last_run_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Reporting view of a task joined with its schedule and health counter.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    #[serde(flatten)]
    pub task: PeriodicTask,
    pub schedule_kind: ScheduleKind,
    pub schedule: String,
    pub consecutive_failures: u32,
}
