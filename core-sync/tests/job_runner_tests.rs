//! End-to-end tests of the job runner driving the metadata sync engine
//! against a SQLite store.

mod common;

use common::{ScriptedSource, Step, TempDatabase};
use core_runtime::events::{CoreEvent, EventBus, EventStream, JobEvent};
use core_store::{
    create_test_pool, DurableStore, JobStatus, RecoveryOutcome, SqliteStore, INTERRUPTED_ERROR,
};
use core_sync::{
    HandlerRegistry, JobRunner, MetadataSyncEngine, MetadataSyncHandler, METADATA_SYNC_JOB_TYPE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn build_runner(
    source: Arc<ScriptedSource>,
    store: Arc<SqliteStore>,
    bus: Arc<EventBus>,
) -> JobRunner {
    let engine = Arc::new(MetadataSyncEngine::new(source, store.clone(), bus.clone()));
    let registry = HandlerRegistry::new().with_handler(
        METADATA_SYNC_JOB_TYPE,
        Arc::new(MetadataSyncHandler::new(engine)),
    );
    JobRunner::new(store, registry, bus).with_poll_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn test_transient_failure_then_resumed_success() {
    let store = Arc::new(SqliteStore::new(create_test_pool().await.unwrap()));
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Page(vec!["1"], Some("token-1")),
        Step::Transient("503 Service Unavailable"),
        Step::Page(vec!["2"], None),
    ]));
    let runner = build_runner(source.clone(), store.clone(), Arc::new(EventBus::default()));
    let id = store.create_job(METADATA_SYNC_JOB_TYPE, 3).await.unwrap();

    runner.run_once().await.unwrap();
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job
        .last_error
        .as_deref()
        .unwrap()
        .contains("503 Service Unavailable"));
    assert_eq!(store.file_count().await.unwrap(), 1);

    runner.run_once().await.unwrap();
    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error, None);
    assert_eq!(store.file_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_exhausted_job_needs_manual_retry() {
    let store = Arc::new(SqliteStore::new(create_test_pool().await.unwrap()));
    let source = Arc::new(ScriptedSource::new(vec![Step::Permanent("401 Unauthorized")]));
    let bus = Arc::new(EventBus::default());
    let mut dead = EventStream::new(bus.subscribe())
        .filter(|e| matches!(e, CoreEvent::Job(JobEvent::Dead { .. })));
    let runner = build_runner(source.clone(), store.clone(), bus);
    let id = store.create_job(METADATA_SYNC_JOB_TYPE, 1).await.unwrap();

    runner.run_once().await.unwrap();
    assert_eq!(
        store.get_job(id).await.unwrap().unwrap().status,
        JobStatus::Dead
    );
    assert!(dead.try_recv().is_some());
    assert_eq!(runner.run_once().await.unwrap(), 0);

    assert_eq!(store.retry_jobs().await.unwrap(), 1);
    source.push(Step::Page(vec!["1"], None));
    runner.run_once().await.unwrap();

    let job = store.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn test_unknown_job_type_does_not_stop_batch() {
    let store = Arc::new(SqliteStore::new(create_test_pool().await.unwrap()));
    let source = Arc::new(ScriptedSource::new(vec![Step::Page(vec!["1"], None)]));
    let runner = build_runner(source, store.clone(), Arc::new(EventBus::default()));

    let unknown = store.create_job("thumbnail", 3).await.unwrap();
    let sync = store.create_job(METADATA_SYNC_JOB_TYPE, 3).await.unwrap();

    assert_eq!(runner.run_once().await.unwrap(), 2);

    let unknown = store.get_job(unknown).await.unwrap().unwrap();
    assert_eq!(unknown.status, JobStatus::Failed);
    assert_eq!(unknown.attempts, 1);
    assert_eq!(
        unknown.last_error.as_deref(),
        Some("Unknown job type: thumbnail")
    );
    assert_eq!(
        store.get_job(sync).await.unwrap().unwrap().status,
        JobStatus::Done
    );
}

#[tokio::test]
async fn test_store_failure_is_recorded_and_next_job_resumes() {
    let store = Arc::new(SqliteStore::new(create_test_pool().await.unwrap()));
    sqlx::query(
        "CREATE TRIGGER reject_bad BEFORE INSERT ON files WHEN NEW.id = 'bad' \
         BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Page(vec!["1"], Some("token-1")),
        Step::Page(vec!["2", "bad"], None),
        Step::Page(vec!["2"], None),
    ]));
    let runner = build_runner(source.clone(), store.clone(), Arc::new(EventBus::default()));

    let first = store.create_job(METADATA_SYNC_JOB_TYPE, 3).await.unwrap();
    let second = store.create_job(METADATA_SYNC_JOB_TYPE, 3).await.unwrap();

    assert_eq!(runner.run_once().await.unwrap(), 2);

    let first = store.get_job(first).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Failed);
    assert_eq!(first.attempts, 1);
    assert!(first.last_error.as_deref().unwrap().contains("rejected"));

    let second = store.get_job(second).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Done);
    assert_eq!(store.file_count().await.unwrap(), 2);
    assert_eq!(
        source.requests(),
        vec![
            None,
            Some("token-1".to_string()),
            Some("token-1".to_string())
        ]
    );
}

#[tokio::test]
async fn test_crash_recovery_on_restart() {
    let db = TempDatabase::new();

    let (stuck, exhausted) = {
        let store = db.open().await;
        let stuck = store.create_job(METADATA_SYNC_JOB_TYPE, 3).await.unwrap();
        store
            .update_job(stuck, JobStatus::Running, 1, None)
            .await
            .unwrap();
        let exhausted = store.create_job(METADATA_SYNC_JOB_TYPE, 2).await.unwrap();
        store
            .update_job(exhausted, JobStatus::Running, 2, None)
            .await
            .unwrap();
        store.pool().close().await;
        (stuck, exhausted)
    };

    let store = Arc::new(db.open().await);
    let source = Arc::new(ScriptedSource::new(vec![]));
    let runner = build_runner(source, store.clone(), Arc::new(EventBus::default()));

    let outcome = runner.recover_stuck_jobs().await.unwrap();
    assert_eq!(
        outcome,
        RecoveryOutcome {
            recovered: 1,
            exhausted: 1
        }
    );

    let stuck = store.get_job(stuck).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Failed);
    assert_eq!(stuck.attempts, 1);
    assert_eq!(stuck.last_error.as_deref(), Some(INTERRUPTED_ERROR));

    let exhausted = store.get_job(exhausted).await.unwrap().unwrap();
    assert_eq!(exhausted.status, JobStatus::Dead);
}

#[tokio::test]
async fn test_daemon_loop_processes_work_until_shutdown() {
    let store = Arc::new(SqliteStore::new(create_test_pool().await.unwrap()));
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Page(vec!["1", "2"], Some("token-1")),
        Step::Page(vec!["3"], None),
    ]));
    let bus = Arc::new(EventBus::default());
    let mut completed = EventStream::new(bus.subscribe())
        .filter(|e| matches!(e, CoreEvent::Job(JobEvent::Completed { .. })));
    let runner = build_runner(source, store.clone(), bus);
    let id = store.create_job(METADATA_SYNC_JOB_TYPE, 3).await.unwrap();

    let shutdown = CancellationToken::new();
    let daemon = {
        let shutdown = shutdown.clone();
        async move { runner.run(shutdown).await }
    };
    let waiter = async {
        let event = tokio::time::timeout(Duration::from_secs(5), completed.recv())
            .await
            .expect("job should complete")
            .unwrap();
        shutdown.cancel();
        event
    };

    let (result, event) = tokio::join!(daemon, waiter);
    result.unwrap();

    assert!(matches!(
        event,
        CoreEvent::Job(JobEvent::Completed { job_id, .. }) if job_id == id.0
    ));
    assert_eq!(store.file_count().await.unwrap(), 3);
    assert_eq!(
        store.count_jobs_by_status().await.unwrap().done,
        1
    );
}
