use std::sync::Arc;
use std::time::Duration;

use autoindex_core::{
    AdvisorConfig, BacktestOutcome, IndexAdvisor, JsonFileStore, LifecycleState, MemoryEngine, MemoryStore,
    MetadataStore, RunFilter,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const ROWS: u64 = 100_000;

fn orders_engine() -> Arc<MemoryEngine> {
    let engine = Arc::new(MemoryEngine::new());
    engine.add_table("orders", ROWS, &["id", "customer_id", "status", "created_at"]);
    engine.set_primary_key("orders", "id");
    engine
}

fn recording_config() -> AdvisorConfig {
    let mut config = AdvisorConfig::default();
    config.recording.enabled = true;
    config.store.retry_backoff_ms = 1;
    config
}

fn record_orders(advisor: &IndexAdvisor, times: u64) {
    let recorder = advisor.recorder();
    for i in 0..times {
        let sql = format!("SELECT * FROM orders WHERE customer_id = {i} AND status = 'paid'");
        recorder.record(&sql, Duration::from_micros(800), &[]);
    }
}

async fn process_and_optimize(advisor: &IndexAdvisor) -> autoindex_core::OptimizeReport {
    advisor.process(&RunFilter::default()).await.unwrap();
    advisor
        .optimize(&RunFilter::default(), &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn frequent_full_scan_gets_a_kept_index() {
    let engine = orders_engine();
    let store = Arc::new(MemoryStore::new());
    let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());

    record_orders(&advisor, 150);
    let report = process_and_optimize(&advisor).await;

    assert_eq!(report.candidates, 1);
    let kept: Vec<_> = report.kept().collect();
    assert_eq!(kept.len(), 1);
    let index = kept[0];
    assert_eq!(index.table, "orders");
    assert_eq!(index.columns, vec!["customer_id".to_string(), "status".to_string()]);
    assert_eq!(index.baseline_rows, Some(ROWS));
    assert!(index.after_rows.is_some_and(|rows| rows < ROWS / 10));

    assert_eq!(
        engine.index_columns("orders", &index.name),
        Some(vec!["customer_id".to_string(), "status".to_string()])
    );
    let stored = store.managed_index(&index.name).await.unwrap().unwrap();
    assert_eq!(stored.state, LifecycleState::Kept);
}

#[tokio::test]
async fn infrequent_statement_produces_nothing() {
    let engine = orders_engine();
    let store = Arc::new(MemoryStore::new());
    let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());

    record_orders(&advisor, 3);
    let report = process_and_optimize(&advisor).await;

    assert_eq!(report.candidates, 0);
    assert!(report.outcomes.is_empty());
    assert!(engine.ddl_log().is_empty());
    assert_eq!(store.query_records().await.unwrap()[0].count, 3);
}

#[tokio::test]
async fn unhelpful_index_is_rolled_back() {
    let engine = orders_engine();
    engine.set_selectivity("orders", "customer_id", 1);
    engine.set_selectivity("orders", "status", 1);
    let store = Arc::new(MemoryStore::new());
    let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());

    record_orders(&advisor, 150);
    let report = process_and_optimize(&advisor).await;

    let BacktestOutcome::Finished(index) = &report.outcomes[0] else {
        panic!("unexpected outcome {:?}", report.outcomes[0]);
    };
    assert_eq!(index.state, LifecycleState::Dropped);
    assert_eq!(engine.index_names("orders"), vec!["PRIMARY".to_string()]);
    assert!(engine.ddl_log().iter().any(|sql| sql.starts_with("DROP INDEX")));
}

#[tokio::test]
async fn bulk_drop_spares_foreign_indexes() {
    let engine = orders_engine();
    let store = Arc::new(MemoryStore::new());
    let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());

    record_orders(&advisor, 150);
    process_and_optimize(&advisor).await;
    engine.add_index("orders", "idx_created_at", &["created_at"], false);

    let dropped = advisor.drop_managed(Some("orders"), false).await.unwrap();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].name, "autoidx_customer_id_status");
    assert_eq!(
        engine.index_names("orders"),
        vec!["PRIMARY".to_string(), "idx_created_at".to_string()]
    );

    let managed = advisor.show_managed().await.unwrap();
    assert_eq!(managed[0].state, LifecycleState::Dropped);
}

#[tokio::test]
async fn second_run_is_a_noop() {
    let engine = orders_engine();
    let store = Arc::new(MemoryStore::new());
    let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());

    record_orders(&advisor, 150);
    process_and_optimize(&advisor).await;
    let ddl_count = engine.ddl_log().len();

    record_orders(&advisor, 10);
    let report = process_and_optimize(&advisor).await;
    assert_eq!(report.candidates, 0);
    assert_eq!(engine.ddl_log().len(), ddl_count);
    assert_eq!(store.query_records().await.unwrap()[0].count, 160);
}

#[tokio::test]
async fn unmeasurable_leftover_index_is_left_in_place() {
    let engine = orders_engine();
    engine.add_index("orders", "autoidx_created_at", &["created_at"], false);
    let store = Arc::new(MemoryStore::new());
    let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());

    let report = process_and_optimize(&advisor).await;
    assert_eq!(report.reconcile.failed, vec!["autoidx_created_at".to_string()]);
    assert!(report.reconcile.dropped.is_empty());
    assert_eq!(
        engine.index_names("orders"),
        vec!["PRIMARY".to_string(), "autoidx_created_at".to_string()]
    );
}

#[tokio::test]
async fn leftover_index_is_measured_against_recorded_statements() {
    let engine = orders_engine();
    engine.set_selectivity("orders", "created_at", 1);
    engine.add_index("orders", "autoidx_created_at", &["created_at"], false);
    let store = Arc::new(MemoryStore::new());
    let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());

    let recorder = advisor.recorder();
    for day in 0..80 {
        let sql = format!("SELECT id FROM orders WHERE created_at = '2024-01-{:02}'", day % 28 + 1);
        recorder.record(&sql, Duration::from_micros(900), &[]);
    }
    advisor.process(&RunFilter::default()).await.unwrap();

    let report = advisor.reconcile().await.unwrap();
    assert_eq!(report.dropped, vec!["autoidx_created_at".to_string()]);
    assert_eq!(engine.index_names("orders"), vec!["PRIMARY".to_string()]);
}

#[tokio::test]
async fn index_kept_during_store_outage_survives_restart() {
    let engine = orders_engine();
    let store = Arc::new(MemoryStore::new());
    let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());
    record_orders(&advisor, 150);
    advisor.process(&RunFilter::default()).await.unwrap();

    store.fail_next_writes(100);
    let report = advisor
        .optimize(&RunFilter::default(), &CancellationToken::new())
        .await
        .unwrap();
    let kept: Vec<String> = report.kept().map(|r| r.name.clone()).collect();
    assert_eq!(kept, vec!["autoidx_customer_id_status".to_string()]);
    assert_eq!(report.deferred_records, 1);
    assert!(store.managed_indexes().await.unwrap().is_empty());

    // the held record is lost with the process
    drop(advisor);
    store.fail_next_writes(0);
    let restarted = IndexAdvisor::new(recording_config(), engine.clone(), store.clone());
    let reconciled = restarted.reconcile().await.unwrap();

    assert_eq!(reconciled.kept, kept);
    assert!(reconciled.dropped.is_empty());
    assert!(engine.index_names("orders").contains(&kept[0]));
    let stored = store.managed_index(&kept[0]).await.unwrap().unwrap();
    assert_eq!(stored.state, LifecycleState::Kept);
    assert_eq!(stored.baseline_rows, Some(ROWS));
}

#[tokio::test]
async fn file_store_keeps_lifecycle_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("autoindex.json");
    let engine = orders_engine();

    {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let advisor = IndexAdvisor::new(recording_config(), engine.clone(), store);
        record_orders(&advisor, 150);
        process_and_optimize(&advisor).await;
    }

    let store = JsonFileStore::open(&path).unwrap();
    let managed = store.managed_indexes().await.unwrap();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].state, LifecycleState::Kept);
    assert_eq!(store.query_records().await.unwrap()[0].count, 150);
    assert_eq!(store.summaries().await.unwrap().len(), 1);
}
