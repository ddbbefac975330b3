use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::store::ScheduleStore;

/// Shortest period between collection passes.
pub const MIN_COLLECT_INTERVAL: Duration = Duration::from_millis(1);

/// Background reclamation of schedules that no task references.
///
/// Task deletion already triggers a pass; this loop catches schedules left
/// behind by rejected creations and by passes that failed.
pub struct ScheduleCollector {
    schedules: Arc<ScheduleStore>,
    every: Duration,
}

impl ScheduleCollector {
    /// `every` is clamped to at least [`MIN_COLLECT_INTERVAL`].
    pub fn new(schedules: Arc<ScheduleStore>, every: Duration) -> Self {
        Self {
            schedules,
            every: every.max(MIN_COLLECT_INTERVAL),
        }
    }

    /// Main loop. Collects every `every` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(every = ?self.every, "schedule collector started");

        let mut interval = tokio::time::interval(self.every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.schedules.garbage_collect() {
                        error!("schedule collection failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender also ends the loop.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("schedule collector shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScheduleKind;
    use chrono_tz::Tz;
    use rusqlite::Connection;
    use serde_json::json;

    #[tokio::test]
    async fn collects_then_stops_on_shutdown() {
        let db = crate::db::open(Connection::open_in_memory().unwrap()).unwrap();
        let schedules = Arc::new(ScheduleStore::new(db, Tz::UTC));
        schedules
            .resolve(
                ScheduleKind::Interval,
                json!({"every": 5, "period": "seconds"}).as_object().unwrap(),
            )
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let collector = ScheduleCollector::new(schedules.clone(), Duration::from_millis(10));
        let handle = tokio::spawn(collector.run(rx));

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(schedules.list().unwrap().is_empty());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("collector did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn zero_period_is_clamped_instead_of_panicking() {
        let db = crate::db::open(Connection::open_in_memory().unwrap()).unwrap();
        let schedules = Arc::new(ScheduleStore::new(db, Tz::UTC));
        let collector = ScheduleCollector::new(schedules, Duration::ZERO);
        assert_eq!(collector.every, MIN_COLLECT_INTERVAL);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(collector.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("collector did not stop")
            .unwrap();
    }
}
