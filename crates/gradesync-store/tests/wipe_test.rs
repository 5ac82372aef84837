mod common;

use common::FakeStore;
use gradesync_core::WipeConfig;
use gradesync_store::{student_filter_formula, RetryPolicy, WipeEngine};
use std::sync::Arc;
use std::time::Duration;

const TABLE: &str = "tblDetails";

fn config() -> WipeConfig {
    WipeConfig {
        requests_per_second: 1000,
        ..Default::default()
    }
}

fn engine(store: &Arc<FakeStore>, config: &WipeConfig) -> WipeEngine {
    WipeEngine::new(store.clone(), RetryPolicy::immediate(4), config)
}

#[tokio::test]
async fn empty_table_is_a_no_op() {
    let store = Arc::new(FakeStore::new());
    let report = engine(&store, &config()).wipe(TABLE).await.unwrap();

    assert_eq!(report.passes, 0);
    assert_eq!(report.deleted, 0);
    assert!(report.converged());
    assert_eq!(store.list_calls(TABLE), 1);
    assert_eq!(store.delete_batches(), 0);
}

#[tokio::test]
async fn converges_despite_stale_listings() {
    let store = Arc::new(FakeStore::new().with_lag(2).seed(TABLE, 95));
    let report = engine(&store, &config()).wipe(TABLE).await.unwrap();

    assert!(report.converged());
    assert!(report.passes <= 5);
    assert_eq!(report.stragglers, 0);
    assert_eq!(report.deleted, 95);
    assert_eq!(store.alive(TABLE), 0);
    // a later listing really is empty
    assert_eq!(engine(&store, &config()).wipe(TABLE).await.unwrap().passes, 0);
}

#[tokio::test]
async fn batches_hold_at_most_ten_ids() {
    let store = Arc::new(FakeStore::new().seed(TABLE, 31));
    let report = engine(&store, &config()).wipe(TABLE).await.unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(store.delete_batches(), 4);
    assert_eq!(report.failed_batches, 0);
}

#[tokio::test]
async fn transient_delete_failures_are_retried() {
    let store = Arc::new(FakeStore::new().seed(TABLE, 20).fail_deletes(&[429, 503, 502]));
    let report = engine(&store, &config()).wipe(TABLE).await.unwrap();

    assert!(report.converged());
    assert_eq!(report.failed_batches, 0);
    assert_eq!(store.alive(TABLE), 0);
}

#[tokio::test]
async fn failed_batches_do_not_stop_the_pass() {
    // first batch of the first pass fails outright; verify picks it up
    let store = Arc::new(FakeStore::new().seed(TABLE, 30).fail_deletes(&[422]));
    let config = WipeConfig {
        concurrency: 1,
        ..config()
    };
    let report = engine(&store, &config).wipe(TABLE).await.unwrap();

    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.passes, 2);
    assert!(report.converged());
    assert_eq!(store.alive(TABLE), 0);
}

#[tokio::test]
async fn long_lag_falls_back_to_single_deletes() {
    let store = Arc::new(FakeStore::new().with_lag(10).seed(TABLE, 25));
    let config = WipeConfig {
        max_passes: 2,
        ..config()
    };
    let report = engine(&store, &config).wipe(TABLE).await.unwrap();

    assert_eq!(report.passes, 2);
    assert_eq!(report.stragglers, 25);
    // phantom stragglers are already gone, not failures
    assert!(report.converged());
    assert_eq!(store.single_deletes(), 25);
}

#[tokio::test]
async fn undeletable_records_are_reported() {
    let store = Arc::new(FakeStore::new().seed(TABLE, 20).lock(TABLE, 3));
    let report = engine(&store, &config()).wipe(TABLE).await.unwrap();

    assert_eq!(report.passes, 5);
    assert_eq!(report.survivors.len(), 3);
    assert!(!report.converged());
    assert_eq!(store.alive(TABLE), 3);
}

#[tokio::test]
async fn worker_pool_width_is_respected() {
    let store = Arc::new(
        FakeStore::new()
            .seed(TABLE, 100)
            .with_delete_latency(Duration::from_millis(5)),
    );
    let config = WipeConfig {
        concurrency: 2,
        ..config()
    };
    engine(&store, &config).wipe(TABLE).await.unwrap();

    assert!(store.max_in_flight() <= 2);
    assert_eq!(store.alive(TABLE), 0);
}

#[tokio::test]
async fn student_scope_leaves_other_rows() {
    let store = Arc::new(FakeStore::new().seed_students(
        TABLE,
        &[("Ada", 12), ("Jo \"JJ\" Smith", 4), ("Grace", 7)],
    ));
    let formula = student_filter_formula(&["Ada".to_string(), "Jo \"JJ\" Smith".to_string()]);
    let report = engine(&store, &config())
        .wipe_matching(TABLE, formula)
        .await
        .unwrap();

    assert_eq!(report.deleted, 16);
    assert_eq!(store.alive(TABLE), 7);
    assert!(store
        .rows(TABLE)
        .iter()
        .all(|r| r["Student Name"] == "Grace"));
}

#[tokio::test]
async fn dispatch_rate_stays_under_the_ceiling() {
    let store = Arc::new(FakeStore::new().seed(TABLE, 200));
    let config = WipeConfig {
        requests_per_second: 5,
        concurrency: 50,
        ..Default::default()
    };
    let wipe = engine(&store, &config);
    let task = tokio::spawn(async move { wipe.wipe(TABLE).await });

    tokio::time::sleep(Duration::from_millis(990)).await;
    let dispatched = store.delete_batches();
    task.abort();

    assert!(dispatched >= 1, "no batch dispatched");
    assert!(dispatched <= 5, "{dispatched} batches in the first second at 5/s");
}
