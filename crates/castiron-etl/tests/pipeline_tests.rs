//! End-to-end pipeline tests
//!
//! Drive the consume loop with newline-delimited MinIO events against the
//! in-memory store, running commands through the real `/bin/sh`.

mod common;

use castiron_etl::storage::ObjectStore;
use common::{config_doc, created, init_test_tracing, removed, MemoryWorker, BUCKET};

const CONFIG_KEY: &str = "cfg/a.toml";

async fn worker_with_config(shell: &str, save_error_log: bool, max_concurrent: usize) -> MemoryWorker {
    init_test_tracing();
    let mut w = MemoryWorker::new(max_concurrent);
    w.put(CONFIG_KEY, config_doc(shell, save_error_log)).await;
    let stats = w.consume(&[created(CONFIG_KEY)]).await;
    assert_eq!(stats.configs_registered, 1);
    w
}

// ============================================================================
// Lifecycle Scenarios
// ============================================================================

#[tokio::test]
async fn test_successful_file_is_archived() {
    let mut w = worker_with_config("exit 0", false, 1).await;
    w.put("in/x.csv", "id,qty\n1,2\n").await;

    let stats = w.consume(&[created("in/x.csv")]).await;

    assert_eq!(stats.files_archived, 1);
    assert!(!w.store.contains(BUCKET, "in/x.csv"));
    assert!(!w.store.contains(BUCKET, "proc/x.csv"));
    assert_eq!(
        w.store.get(BUCKET, "arch/x.csv").await.unwrap(),
        b"id,qty\n1,2\n"
    );
}

#[tokio::test]
async fn test_failed_file_goes_to_error_with_log() {
    let mut w = worker_with_config("echo \"cannot load $DATABASE_TABLE\"; exit 1", true, 1).await;
    w.put("in/y.csv", "bad").await;

    let stats = w.consume(&[created("in/y.csv")]).await;

    assert_eq!(stats.files_failed, 1);
    assert!(w.store.contains(BUCKET, "err/y.csv"));
    let log = w.store.get(BUCKET, "err/y_csv_error_log.txt").await.unwrap();
    assert_eq!(String::from_utf8(log).unwrap(), "cannot load orders\n");
    assert!(!w.store.contains(BUCKET, "in/y.csv"));
    assert!(!w.store.contains(BUCKET, "proc/y.csv"));
}

#[tokio::test]
async fn test_removed_config_stops_routing() {
    let mut w = worker_with_config("exit 0", false, 1).await;
    w.put("in/z.csv", "1").await;

    let stats = w.consume(&[removed(CONFIG_KEY), created("in/z.csv")]).await;

    assert_eq!(stats.configs_unregistered, 1);
    assert_eq!(stats.files_archived, 0);
    assert!(w.store.contains(BUCKET, "in/z.csv"));
    assert!(!w.store.contains(BUCKET, "arch/z.csv"));
}

#[tokio::test]
async fn test_redelivered_event_is_noop() {
    let mut w = worker_with_config("exit 0", false, 1).await;
    // the worker stopped after claiming z.csv
    w.put("proc/z.csv", "1").await;

    let stats = w.consume(&[created("in/z.csv"), created("in/z.csv")]).await;

    assert_eq!(stats.events, 2);
    assert_eq!(stats.files_archived + stats.files_failed + stats.errors, 0);
    assert!(w.store.contains(BUCKET, "proc/z.csv"));
}

#[tokio::test]
async fn test_missing_command_counts_as_failure() {
    let mut w = worker_with_config("castiron-no-such-command \"$ETL_FILENAME\"", true, 1).await;
    w.put("in/q.csv", "1").await;

    let stats = w.consume(&[created("in/q.csv")]).await;

    assert_eq!(stats.files_failed, 1);
    assert!(w.store.contains(BUCKET, "err/q.csv"));
    let log = w.store.get(BUCKET, "err/q_csv_error_log.txt").await.unwrap();
    assert!(!log.is_empty());
}

#[tokio::test]
async fn test_unmatched_and_foreign_events_ignored() {
    let mut w = worker_with_config("exit 0", false, 1).await;
    w.put("in/readme.txt", "hello").await;
    w.put("in/nested/x.csv", "1").await;

    let foreign = r#"{"EventName":"s3:ObjectCreated:Put","Key":"other/in/x.csv","Records":[]}"#;
    let stats = w
        .consume(&[
            created("in/readme.txt"),
            created("in/nested/x.csv"),
            foreign.to_string(),
            "{not json".to_string(),
        ])
        .await;

    assert_eq!(stats.events, 3);
    assert_eq!(stats.errors, 0);
    assert!(w.store.contains(BUCKET, "in/readme.txt"));
    assert!(w.store.contains(BUCKET, "in/nested/x.csv"));
}

#[tokio::test]
async fn test_store_failure_does_not_stop_loop() {
    let mut w = worker_with_config("exit 0", false, 1).await;
    w.put("in/a.csv", "1").await;
    w.put("in/b.csv", "2").await;
    w.store.fail_key("arch/a.csv");

    let stats = w.consume(&[created("in/a.csv"), created("in/b.csv")]).await;

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.files_archived, 1);
    // no rollback: a.csv waits in processing
    assert!(w.store.contains(BUCKET, "proc/a.csv"));
    assert!(w.store.contains(BUCKET, "arch/b.csv"));
}

#[tokio::test]
async fn test_config_update_replaces_previous() {
    let mut w = worker_with_config("exit 1", false, 1).await;
    w.put(CONFIG_KEY, config_doc("exit 0", false)).await;
    w.put("in/x.csv", "1").await;

    let stats = w.consume(&[created(CONFIG_KEY), created("in/x.csv")]).await;

    assert_eq!(stats.files_archived, 1);
    assert!(w.store.contains(BUCKET, "arch/x.csv"));
}

// ============================================================================
// Bounded Concurrency
// ============================================================================

#[tokio::test]
async fn test_parallel_files_all_routed() {
    let mut w = worker_with_config("sleep 0.1; test \"$(cat \"$ETL_FILENAME\")\" != fail", false, 4).await;
    let mut events = Vec::new();
    for i in 0..6 {
        let key = format!("in/f{i}.csv");
        w.put(&key, if i == 5 { "fail" } else { "ok" }).await;
        events.push(created(&key));
    }

    let stats = w.consume(&events).await;

    assert_eq!(stats.files_archived, 5);
    assert_eq!(stats.files_failed, 1);
    for i in 0..5 {
        assert!(w.store.contains(BUCKET, &format!("arch/f{i}.csv")));
    }
    assert!(w.store.contains(BUCKET, "err/f5.csv"));
    assert!(w.keys().iter().all(|k| !k.starts_with("proc/") || k == "proc/.keep"));
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_bootstrap_loads_configs_and_recovers() {
    init_test_tracing();
    let mut w = MemoryWorker::new(1);
    w.put(CONFIG_KEY, config_doc("exit 0", false)).await;
    // interrupted archive move
    w.put("proc/old.csv", "1").await;
    w.put("arch/old.csv", "1").await;
    w.put("in/new.csv", "2").await;

    let report = w.worker.bootstrap().await.unwrap().unwrap();

    assert_eq!(report.removed, vec!["proc/old.csv"]);
    assert!(report.stranded.is_empty());
    assert_eq!(w.worker.router().registry().len(), 1);

    let stats = w.consume(&[created("in/new.csv")]).await;
    assert_eq!(stats.files_archived, 1);
    assert!(w.store.contains(BUCKET, "arch/new.csv"));
}
