// End-to-end behaviour of the scheduler service: schedule sharing,
// collection, the duplicate-run guard and the circuit breaker.

use std::sync::Arc;

use cadence_core::config::{BreakerConfig, CadenceConfig};
use cadence_scheduler::{
    db, CreateTask, FailureOutcome, LocalRunRegistry, ScheduleKind, ScheduleStore, SchedulerError,
    SchedulerService, TaskSpec,
};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde_json::{json, Value};

fn request(name: &str, kind: &str, fields: Value) -> CreateTask {
    CreateTask {
        task: TaskSpec::new(name, "noop"),
        schedule_kind: kind.to_string(),
        schedule_fields: fields.as_object().cloned().unwrap(),
    }
}

fn service_with(breaker: BreakerConfig) -> (Arc<LocalRunRegistry>, SchedulerService) {
    let live = Arc::new(LocalRunRegistry::new());
    let config = CadenceConfig {
        breaker,
        ..CadenceConfig::default()
    };
    let svc =
        SchedulerService::from_config(Connection::open_in_memory().unwrap(), &config, live.clone())
            .unwrap();
    (live, svc)
}

fn service() -> SchedulerService {
    service_with(BreakerConfig::default()).1
}

#[test]
fn identical_schedules_are_shared_and_collected_after_last_task() {
    let svc = service();
    let every_20s = json!({"every": 20, "period": "seconds"});

    let t1 = svc.create_task(&request("T1", "interval", every_20s.clone())).unwrap();
    let t2 = svc.create_task(&request("T2", "interval", every_20s)).unwrap();
    assert_eq!(t1.schedule_id, t2.schedule_id);
    assert_eq!(svc.schedules().list().unwrap().len(), 1);

    svc.delete_task("T1").unwrap();
    assert!(svc.schedules().get(&t1.schedule_id).unwrap().is_some());

    svc.delete_task("T2").unwrap();
    svc.garbage_collect().unwrap();
    assert!(svc.schedules().get(&t1.schedule_id).unwrap().is_none());
}

#[test]
fn crontab_line_task_round_trips_through_listing() {
    let svc = service();
    svc.create_task(&request(
        "report",
        "crontab",
        json!({"crontab_line": "32 18 mon,wed 17,21,29 *"}),
    ))
    .unwrap();

    let listed = svc.list_tasks().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].schedule, "32 18 mon,wed 17,21,29 * (m/h/dw/dM/MY)");

    let err = svc
        .create_task(&request("bad", "crontab", json!({"crontab_line": "32 18 mon,wed 17"})))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidField { .. }));
}

#[test]
fn one_off_only_binds_to_clocked() {
    let svc = service();
    let cases = [
        ("interval", json!({"every": 1, "period": "days"}), false),
        ("crontab", json!({"minute": "0"}), false),
        ("solar", json!({"event": "sunrise", "latitude": 10, "longitude": 10}), false),
        ("clocked", json!({"clocked_time": "2031-01-01 08:00"}), true),
    ];
    for (i, (kind, fields, ok)) in cases.into_iter().enumerate() {
        let mut req = request(&format!("once-{i}"), kind, fields);
        req.task.one_off = true;
        match svc.create_task(&req) {
            Ok(_) => assert!(ok, "{kind} accepted a one_off task"),
            Err(SchedulerError::InvalidOneOff { .. }) => assert!(!ok, "{kind} rejected one_off"),
            Err(other) => panic!("unexpected error for {kind}: {other}"),
        }
    }
}

#[test]
fn duplicate_and_unknown_target_are_rejected() {
    let svc = service();
    let fields = json!({"every": 5, "period": "minutes"});
    svc.create_task(&request("T1", "interval", fields.clone())).unwrap();

    let err = svc.create_task(&request("T1", "interval", fields.clone())).unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_NAME");

    let mut req = request("T2", "interval", fields);
    req.task.target = "unregistered".to_string();
    assert_eq!(svc.create_task(&req).unwrap_err().code(), "UNKNOWN_TARGET");
}

#[tokio::test]
async fn guard_rejects_overlapping_run() {
    let (live, svc) = service_with(BreakerConfig::default());
    svc.create_task(&request("T1", "interval", json!({"every": 1, "period": "seconds"})))
        .unwrap();

    live.start("T1", "run-a");
    svc.begin_run("T1", "run-a").await.unwrap();

    live.start("T1", "run-b");
    let err = svc.begin_run("T1", "run-b").await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_RUNNING");
    live.finish("T1", "run-b");

    // A skipped run is not a failure.
    assert_eq!(svc.failures().consecutive_failures("T1").unwrap(), 0);

    live.finish("T1", "run-a");
    svc.begin_run("T1", "run-c").await.unwrap();
}

#[test]
fn breaker_disables_after_threshold() {
    let (_, svc) = service_with(BreakerConfig {
        max_retries: 2,
        auto_disable: true,
    });
    svc.create_task(&request("T1", "interval", json!({"every": 1, "period": "hours"})))
        .unwrap();

    assert_eq!(
        svc.report_failure("T1", "timeout").unwrap(),
        FailureOutcome::Counted { failures: 1 }
    );
    svc.report_failure("T1", "timeout").unwrap();
    assert_eq!(
        svc.report_failure("T1", "timeout").unwrap(),
        FailureOutcome::Tripped { failures: 3 }
    );

    let listed = svc.list_tasks().unwrap();
    assert!(!listed[0].task.enabled);
    assert_eq!(listed[0].consecutive_failures, 0);

    // Re-enabling starts a fresh streak.
    svc.set_enabled("T1", true).unwrap();
    svc.report_failure("T1", "timeout").unwrap();
    svc.report_success("T1").unwrap();
    svc.report_failure("T1", "timeout").unwrap();
    svc.report_failure("T1", "timeout").unwrap();
    assert!(svc.tasks().get("T1").unwrap().enabled);
}

#[test]
fn workers_sharing_a_database_file_see_one_schedule_and_one_counter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.db");

    let open = || {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA journal_mode=WAL;").unwrap();
        conn.busy_timeout(std::time::Duration::from_secs(5)).unwrap();
        conn
    };
    let breaker = BreakerConfig {
        max_retries: 10,
        auto_disable: true,
    };
    let worker = |conn| {
        SchedulerService::new(
            db::open(conn).unwrap(),
            Tz::UTC,
            Arc::new(cadence_scheduler::StaticRegistry::new(["noop"])),
            Arc::new(LocalRunRegistry::new()),
            breaker,
        )
    };
    let a = Arc::new(worker(open()));
    let b = Arc::new(worker(open()));

    let fields = json!({"event": "sunset", "latitude": -37.81753, "longitude": 144.96715});
    let ta = a.create_task(&request("A", "solar", fields.clone())).unwrap();
    let tb = b.create_task(&request("B", "solar", fields)).unwrap();
    assert_eq!(ta.schedule_id, tb.schedule_id);
    assert_eq!(a.schedules().list().unwrap().len(), 1);

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|svc| {
            std::thread::spawn(move || {
                for _ in 0..4 {
                    svc.report_failure("A", "boom").unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(b.failures().consecutive_failures("A").unwrap(), 8);
}

#[test]
fn late_failure_for_deleted_task_does_not_carry_over_to_its_successor() {
    let (_, svc) = service_with(BreakerConfig {
        max_retries: 2,
        auto_disable: true,
    });
    let hourly = json!({"every": 1, "period": "hours"});
    svc.create_task(&request("T1", "interval", hourly.clone()))
        .unwrap();
    svc.delete_task("T1").unwrap();

    // Runs still in flight when the task was deleted report afterwards.
    for _ in 0..3 {
        let err = svc.report_failure("T1", "timeout").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    svc.create_task(&request("T1", "interval", hourly)).unwrap();
    assert_eq!(svc.failures().consecutive_failures("T1").unwrap(), 0);
    assert_eq!(
        svc.report_failure("T1", "timeout").unwrap(),
        FailureOutcome::Counted { failures: 1 }
    );
    assert!(svc.tasks().get("T1").unwrap().enabled);
}

#[test]
fn concurrent_resolvers_on_separate_connections_store_one_schedule() {
    const WORKERS: usize = 8;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadence.db");
    let open = || {
        let conn = Connection::open(&path).unwrap();
        conn.busy_timeout(std::time::Duration::from_secs(10)).unwrap();
        conn.execute_batch("PRAGMA journal_mode=WAL;").unwrap();
        conn
    };
    // Schema and journal mode are settled before the race starts.
    let setup = ScheduleStore::new(db::open(open()).unwrap(), Tz::UTC);

    let barrier = Arc::new(std::sync::Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let store = ScheduleStore::new(db::open(open()).unwrap(), Tz::UTC);
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let fields = json!({"every": 15, "period": "minutes"});
                barrier.wait();
                store
                    .resolve(ScheduleKind::Interval, fields.as_object().unwrap())
                    .unwrap()
                    .id
            })
        })
        .collect();

    let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    let stored = setup.list().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, ids[0]);
}
