use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule kind name is not one of the catalogued kinds.
    #[error("Invalid schedule kind: {0}")]
    InvalidKind(String),

    /// A schedule or task field failed type coercion or a range check.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// A periodic task with this name already exists.
    #[error("Duplicate periodic task name: {name}")]
    DuplicateName { name: String },

    /// The task target is not a registered executable.
    #[error("Unknown target: {target}")]
    UnknownTarget { target: String },

    /// `one_off` tasks must be bound to a clocked schedule.
    #[error("one_off task requires a clocked schedule, got {kind}")]
    InvalidOneOff { kind: String },

    /// The resolved schedule was collected before the task row referencing it
    /// was written. Resolving again recreates it.
    #[error("Schedule {id} was collected before the task was attached")]
    ScheduleGone { id: String },

    /// No schedule with the given id exists in the store.
    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    /// No periodic task with the given name exists in the store.
    #[error("Periodic task not found: {name}")]
    NotFound { name: String },

    /// Another run of the same periodic task is still in flight.
    #[error("Periodic task {name} is already running (in flight: {running})")]
    AlreadyRunning { name: String, running: String },

    /// The worker pool's live-run inspection failed.
    #[error("Live run inspection failed: {0}")]
    LiveRuns(String),

    #[error(transparent)]
    Config(#[from] cadence_core::CoreError),

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub(crate) fn field(field: &str, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Short error code string handed to protocol layers.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidKind(_) => "INVALID_KIND",
            SchedulerError::InvalidField { .. } => "INVALID_FIELD",
            SchedulerError::DuplicateName { .. } => "DUPLICATE_NAME",
            SchedulerError::UnknownTarget { .. } => "UNKNOWN_TARGET",
            SchedulerError::InvalidOneOff { .. } => "INVALID_ONE_OFF",
            SchedulerError::ScheduleGone { .. } => "SCHEDULE_GONE",
            SchedulerError::ScheduleNotFound { .. } => "SCHEDULE_NOT_FOUND",
            SchedulerError::NotFound { .. } => "NOT_FOUND",
            SchedulerError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            SchedulerError::LiveRuns(_) => "LIVE_RUNS_ERROR",
            SchedulerError::Config(e) => e.code(),
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
