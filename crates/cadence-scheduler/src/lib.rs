//! `cadence-scheduler` — periodic-task registry with shared schedules and
//! execution safety.
//!
//! # Overview
//!
//! Schedules are stored once per distinct value: the primary key of the
//! `schedules` table is a hash of the kind and its normalized fields, so
//! resolving the same schedule twice returns the same row. Periodic tasks
//! bind a target executable to one schedule; deleting the last task on a
//! schedule lets the collector reclaim it.
//!
//! At run time the worker pool asks the [`guard::ExecutionGuard`] whether a
//! run may start, then reports the outcome to the
//! [`breaker::FailureCounter`], which disables a task after too many
//! consecutive failures.
//!
//! # Schedule kinds
//!
//! | Kind       | Fields                                                       |
//! |------------|--------------------------------------------------------------|
//! | `interval` | `every` > 0, `period` (microseconds … days)                   |
//! | `crontab`  | `minute hour day_of_week day_of_month month_of_year` or a line |
//! | `solar`    | `event`, `latitude`, `longitude` in [-180, 180]              |
//! | `clocked`  | `clocked_time`, naive values read in the default timezone    |

pub mod breaker;
pub mod catalog;
pub mod db;
pub mod engine;
pub mod error;
pub mod guard;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod store;
pub mod tasks;
pub mod types;

pub use breaker::{FailureCounter, FailureOutcome};
pub use catalog::{FieldSpec, FieldType, IntervalPeriod, ScheduleKind, SolarEvent};
pub use engine::ScheduleCollector;
pub use error::{Result, SchedulerError};
pub use guard::{ExecutionGuard, LiveRuns, LocalRunRegistry};
pub use registry::{ExecutableRegistry, StaticRegistry};
pub use schedule::{Fields, ScheduleSpec};
pub use service::{CreateTask, SchedulerService};
pub use store::ScheduleStore;
pub use tasks::TaskStore;
pub use types::{PeriodicTask, Schedule, TaskSpec, TaskSummary};
