use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};

/// Live-execution inspection provided by the worker pool.
///
/// Implementations must be `Send + Sync`; the guard is shared by every
/// worker thread that starts runs.
#[async_trait]
pub trait LiveRuns: Send + Sync {
    /// Run ids currently in flight for `task_name`.
    async fn in_flight(&self, task_name: &str) -> Result<HashSet<String>>;
}

/// Enforces "one task, one concurrent execution".
///
/// The check reads a single snapshot of in-flight runs and takes no lock of
/// its own. Two runs that start inside the same snapshot window can both
/// pass.
#[derive(Clone)]
pub struct ExecutionGuard {
    live: Arc<dyn LiveRuns>,
}

impl ExecutionGuard {
    pub fn new(live: Arc<dyn LiveRuns>) -> Self {
        Self { live }
    }

    /// Admit `run_id` unless another run of `task_name` is in flight.
    ///
    /// `run_id` itself may already appear in the snapshot (the worker pool
    /// usually registers a run before its body starts).
    pub async fn begin(&self, task_name: &str, run_id: &str) -> Result<()> {
        let in_flight = self.live.in_flight(task_name).await?;
        let mut others: Vec<&str> = in_flight
            .iter()
            .map(String::as_str)
            .filter(|id| *id != run_id)
            .collect();

        if others.is_empty() {
            debug!(task = task_name, run_id, "run admitted");
            return Ok(());
        }

        others.sort_unstable();
        info!(task = task_name, run_id, running = ?others, "duplicate run rejected");
        Err(SchedulerError::AlreadyRunning {
            name: task_name.to_string(),
            running: others.join(","),
        })
    }
}

/// In-process live-run tracker for worker pools that run tasks on the same
/// host. Keyed by task name.
#[derive(Debug, Default)]
pub struct LocalRunRegistry {
    runs: DashMap<String, HashSet<String>>,
}

impl LocalRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `run_id` as in flight.
    pub fn start(&self, task_name: &str, run_id: &str) {
        self.runs
            .entry(task_name.to_string())
            .or_default()
            .insert(run_id.to_string());
    }

    /// Remove `run_id`; drops the task entry once it has no runs left.
    pub fn finish(&self, task_name: &str, run_id: &str) {
        if let Some(mut ids) = self.runs.get_mut(task_name) {
            ids.remove(run_id);
        }
        self.runs.remove_if(task_name, |_, ids| ids.is_empty());
    }

    pub fn running(&self, task_name: &str) -> HashSet<String> {
        self.runs
            .get(task_name)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LiveRuns for LocalRunRegistry {
    async fn in_flight(&self, task_name: &str) -> Result<HashSet<String>> {
        Ok(self.running(task_name))
    }
}
