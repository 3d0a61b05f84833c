//! Operator-facing entry point tying capture, analysis and the index
//! lifecycle together.
//!
//! `process` and `optimize` (and the other catalog-changing operations) are
//! serialized by a single run guard; a second caller gets
//! [`AdvisorError::AlreadyRunning`] instead of waiting.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::analyzer::{AnalysisFailure, Analyzer, QueryAnalysis, RunFilter};
use crate::backtest::{
    BacktestOutcome, Backtester, DroppedIndex, ImprovementPolicy, LifecycleState, ManagedIndex,
    ReconcileReport, RowsExaminedPolicy,
};
use crate::candidates::generate;
use crate::capture::{Aggregator, CapturePump, RecordBatch, RecordSummary, Recorder, RecorderMode, TableActivity};
use crate::catalog::{CatalogSnapshot, IndexReport, UnusedIndex, analyze_indexes, find_unused_indexes};
use crate::config::AdvisorConfig;
use crate::engine::{DatabaseEngine, with_timeout};
use crate::error::{AdvisorError, AdvisorResult};
use crate::health::{PkUsage, pk_exhaustion_report};
use crate::sql::{QueryFingerprint, tables_touched};
use crate::store::{MetadataStore, with_retry};

#[derive(Debug, Clone, Default)]
pub struct ProcessReport {
    /// Summary of the batch flushed by this run, if anything was captured
    pub flushed: Option<RecordSummary>,
    pub applied_batches: usize,
    /// Batches still held in memory because the store rejected them
    pub deferred_batches: usize,
    pub analyzed: usize,
    pub seeds: usize,
    pub failures: Vec<AnalysisFailure>,
    pub store_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OptimizeReport {
    pub reconcile: ReconcileReport,
    pub candidates: usize,
    pub outcomes: Vec<BacktestOutcome>,
    /// Stopped early; remaining candidates were not attempted
    pub cancelled: bool,
    /// Lifecycle records still held in memory because the store rejected them
    pub deferred_records: usize,
}

impl OptimizeReport {
    pub fn kept(&self) -> impl Iterator<Item = &ManagedIndex> {
        self.outcomes.iter().filter_map(|o| match o {
            BacktestOutcome::Finished(record) if record.state == LifecycleState::Kept => Some(record),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub missing_tables: Vec<String>,
    pub removed_queries: usize,
    pub removed_analyses: usize,
    pub removed_tables: usize,
    /// Batch summaries older than the retention window
    pub pruned_summaries: usize,
}

pub struct IndexAdvisor {
    config: AdvisorConfig,
    engine: Arc<dyn DatabaseEngine>,
    store: Arc<dyn MetadataStore>,
    policy: Arc<dyn ImprovementPolicy>,
    aggregator: Arc<Aggregator>,
    recorder: Recorder,
    pump: Mutex<CapturePump>,
    deferred: Mutex<Vec<RecordBatch>>,
    deferred_records: Mutex<BTreeMap<String, ManagedIndex>>,
    run_guard: tokio::sync::Mutex<()>,
}

impl IndexAdvisor {
    pub fn new(config: AdvisorConfig, engine: Arc<dyn DatabaseEngine>, store: Arc<dyn MetadataStore>) -> Self {
        let aggregator = Arc::new(Aggregator::new());
        let (recorder, pump) = Recorder::new(Arc::clone(&aggregator), config.recording.enabled);
        Self {
            config,
            engine,
            store,
            policy: Arc::new(RowsExaminedPolicy),
            aggregator,
            recorder,
            pump: Mutex::new(pump),
            deferred: Mutex::new(Vec::new()),
            deferred_records: Mutex::new(BTreeMap::new()),
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ImprovementPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Capture handle for the host's statement execution path.
    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    pub fn start_recording(&self) {
        self.recorder.start();
    }

    pub fn stop_recording(&self) {
        self.recorder.stop();
    }

    pub fn recording_mode(&self) -> RecorderMode {
        self.recorder.mode()
    }

    /// Discard captured statements that were not yet written, including
    /// batches held back by store failures.
    pub fn drop_recording(&self) {
        self.recorder.drop_pending();
        let dropped = std::mem::take(&mut *self.deferred.lock()).len();
        if dropped > 0 {
            tracing::info!(batches = dropped, "discarded deferred batches");
        }
    }

    /// Move queued capture events into the aggregator.
    pub fn drain_capture(&self) -> usize {
        self.pump.lock().drain()
    }

    pub fn deferred_batches(&self) -> usize {
        self.deferred.lock().len()
    }

    pub fn deferred_records(&self) -> usize {
        self.deferred_records.lock().len()
    }

    /// Captured or held data that a processing run would write. Queued
    /// capture events are drained first.
    pub fn has_pending_work(&self) -> bool {
        self.drain_capture();
        self.aggregator.pending_statements() > 0 || self.deferred_batches() > 0 || self.deferred_records() > 0
    }

    /// Flush captured statements into the store and analyze what the store
    /// has accumulated.
    pub async fn process(&self, filter: &RunFilter) -> AdvisorResult<ProcessReport> {
        let _guard = self.run_guard.try_lock().map_err(|_| AdvisorError::AlreadyRunning)?;
        let mut report = ProcessReport::default();

        self.drain_capture();
        let batch = self.aggregator.flush();
        if !batch.is_empty() {
            report.flushed = Some(batch.summary.clone());
            self.deferred.lock().push(batch);
        }

        self.write_deferred_records().await;
        let (applied, error) = self.write_deferred().await;
        report.applied_batches = applied;
        report.deferred_batches = self.deferred_batches();
        if let Some(err) = error {
            report.store_error = Some(err.to_string());
            return Ok(report);
        }

        let records = match self.store.query_records().await {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(error = %err, "could not read query records");
                report.store_error = Some(err.to_string());
                return Ok(report);
            }
        };

        let analysis = Analyzer::new(self.engine.as_ref(), &self.config)
            .analyze(&records, filter)
            .await;
        for result in &analysis.analyses {
            if let Err(err) = self.store.upsert_analysis(result).await {
                tracing::error!(fingerprint = %result.fingerprint.digest(), error = %err, "could not store analysis");
                report.store_error.get_or_insert_with(|| err.to_string());
            }
        }

        report.analyzed = analysis.analyses.len();
        report.seeds = analysis.seeds().count();
        report.failures = analysis.failures;
        tracing::info!(
            applied = report.applied_batches,
            deferred = report.deferred_batches,
            analyzed = report.analyzed,
            seeds = report.seeds,
            "processing finished"
        );
        Ok(report)
    }

    /// Write held batches oldest first, retrying each with doubling backoff.
    /// Stops at the first batch that still fails and keeps it and everything
    /// after it for the next run.
    async fn write_deferred(&self) -> (usize, Option<AdvisorError>) {
        let mut pending = std::mem::take(&mut *self.deferred.lock());
        let mut applied = 0;

        while !pending.is_empty() {
            let batch = &pending[0];
            match with_retry(&self.config.store, "batch", || self.store.apply_batch(batch)).await {
                Ok(fresh) => {
                    if !fresh {
                        tracing::debug!(batch = %batch.id, "batch already applied");
                    }
                }
                Err(err) => {
                    tracing::error!(
                        batches = pending.len(),
                        error = %err,
                        "store unavailable, keeping batches in memory"
                    );
                    let mut deferred = self.deferred.lock();
                    pending.append(&mut *deferred);
                    *deferred = pending;
                    return (applied, Some(err.into()));
                }
            }
            pending.remove(0);
            applied += 1;
        }
        (applied, None)
    }

    fn defer_records(&self, records: Vec<ManagedIndex>) {
        if records.is_empty() {
            return;
        }
        tracing::error!(records = records.len(), "store unavailable, keeping lifecycle records in memory");
        let mut deferred = self.deferred_records.lock();
        for record in records {
            deferred.insert(record.name.clone(), record);
        }
    }

    /// Write held lifecycle records. Returns how many are still held.
    async fn write_deferred_records(&self) -> usize {
        let pending = std::mem::take(&mut *self.deferred_records.lock());
        let mut failed = Vec::new();
        for record in pending.into_values() {
            let written = with_retry(&self.config.store, "managed index", || {
                self.store.upsert_managed_index(&record)
            })
            .await;
            if written.is_err() {
                failed.push(record);
            }
        }
        self.defer_records(failed);
        self.deferred_records()
    }

    /// Reconcile leftovers, then generate candidates from stored analyses and
    /// backtest them one at a time until done or cancelled.
    pub async fn optimize(&self, filter: &RunFilter, cancel: &CancellationToken) -> AdvisorResult<OptimizeReport> {
        let _guard = self.run_guard.try_lock().map_err(|_| AdvisorError::AlreadyRunning)?;
        let backtester = self.backtester();
        let mut report = OptimizeReport::default();

        // reconciling against a store that lacks records would treat the
        // indexes they describe as orphans
        if self.write_deferred_records().await > 0 {
            tracing::warn!(records = self.deferred_records(), "reconcile skipped, lifecycle records unsaved");
        } else {
            match backtester.reconcile().await {
                Ok(reconciled) => report.reconcile = reconciled,
                Err(err) => tracing::warn!(error = %err, "reconcile skipped"),
            }
        }

        let analyses = self.store.analyses().await?;
        let min_occurrence = filter
            .min_occurrence
            .unwrap_or(self.config.analysis.min_occurrence);
        let seeds: Vec<&QueryAnalysis> = analyses
            .iter()
            .filter(|a| a.occurrence > min_occurrence)
            .collect();

        let catalog = self.catalog(filter.table.as_deref()).await?;
        let mut candidates = generate(seeds, &catalog, &self.config.candidates);
        if let Some(table) = &filter.table {
            candidates.retain(|c| &c.table == table);
        }
        report.candidates = candidates.len();

        for candidate in &candidates {
            if cancel.is_cancelled() {
                tracing::info!(remaining = candidates.len() - report.outcomes.len(), "optimization cancelled");
                report.cancelled = true;
                break;
            }
            report.outcomes.push(backtester.backtest(candidate, &catalog).await);
        }
        self.defer_records(backtester.take_unsaved());
        report.deferred_records = self.deferred_records();

        tracing::info!(
            candidates = report.candidates,
            kept = report.kept().count(),
            attempted = report.outcomes.len(),
            "optimization finished"
        );
        Ok(report)
    }

    pub async fn reconcile(&self) -> AdvisorResult<ReconcileReport> {
        let _guard = self.run_guard.try_lock().map_err(|_| AdvisorError::AlreadyRunning)?;
        let held = self.write_deferred_records().await;
        if held > 0 {
            return Err(AdvisorError::Store(format!("{held} lifecycle records not yet saved")));
        }
        let backtester = self.backtester();
        let report = backtester.reconcile().await;
        self.defer_records(backtester.take_unsaved());
        report
    }

    pub async fn show_managed(&self) -> AdvisorResult<Vec<ManagedIndex>> {
        Ok(self.store.managed_indexes().await?)
    }

    pub async fn drop_managed(&self, table: Option<&str>, dry_run: bool) -> AdvisorResult<Vec<DroppedIndex>> {
        let _guard = self.run_guard.try_lock().map_err(|_| AdvisorError::AlreadyRunning)?;
        let backtester = self.backtester();
        let dropped = backtester.drop_managed(table, dry_run).await;
        self.defer_records(backtester.take_unsaved());
        dropped
    }

    /// Forget statements and activity for tables that no longer exist,
    /// analyses whose statement record is gone, and batch history older than
    /// the retention window.
    pub async fn cleanup(&self) -> AdvisorResult<CleanupReport> {
        let _guard = self.run_guard.try_lock().map_err(|_| AdvisorError::AlreadyRunning)?;
        let records = self.store.query_records().await?;
        let activity = self.store.table_activity().await?;

        let touched: BTreeMap<QueryFingerprint, Vec<String>> = records
            .iter()
            .map(|r| (r.fingerprint.clone(), tables_touched(&r.sample)))
            .collect();
        let known: BTreeSet<&String> = touched.values().flatten().chain(activity.keys()).collect();

        let mut missing = BTreeSet::new();
        for table in known {
            match with_timeout("table exists", self.config.timeouts.plan(), self.engine.table_exists(table)).await {
                Ok(false) => {
                    missing.insert(table.clone());
                }
                Ok(true) => {}
                Err(err) => tracing::warn!(table = %table, error = %err, "existence check failed, keeping records"),
            }
        }

        let stale: Vec<QueryFingerprint> = touched
            .iter()
            .filter(|(_, tables)| tables.iter().any(|t| missing.contains(t)))
            .map(|(fp, _)| fp.clone())
            .collect();
        let mut report = CleanupReport {
            missing_tables: missing.iter().cloned().collect(),
            removed_queries: self.store.remove_queries(&stale).await?,
            ..Default::default()
        };

        let live: BTreeSet<QueryFingerprint> = self
            .store
            .query_records()
            .await?
            .into_iter()
            .map(|r| r.fingerprint)
            .collect();
        let orphaned: Vec<QueryFingerprint> = self
            .store
            .analyses()
            .await?
            .into_iter()
            .map(|a| a.fingerprint)
            .filter(|fp| !live.contains(fp))
            .collect();
        report.removed_analyses = self.store.remove_analyses(&orphaned).await?;
        report.removed_tables = self.store.remove_tables(&report.missing_tables).await?;

        let retention = chrono::Duration::days(i64::from(self.config.store.retention_days));
        report.pruned_summaries = self.store.prune_history(chrono::Utc::now() - retention).await?;

        tracing::info!(
            missing_tables = report.missing_tables.len(),
            removed_queries = report.removed_queries,
            removed_analyses = report.removed_analyses,
            pruned_summaries = report.pruned_summaries,
            "cleanup finished"
        );
        Ok(report)
    }

    /// Duplicate and left-prefix redundant indexes in the live catalog.
    pub async fn inspect_indexes(&self, table: Option<&str>) -> AdvisorResult<IndexReport> {
        let catalog = self.catalog(table).await?;
        Ok(analyze_indexes(&catalog, table))
    }

    /// Secondary indexes the server reports no reads for.
    pub async fn unused_indexes(&self, table: Option<&str>) -> AdvisorResult<Vec<UnusedIndex>> {
        let catalog = self.catalog(table).await?;
        let reads = with_timeout("index reads", self.config.timeouts.plan(), self.engine.index_reads(table)).await?;
        Ok(find_unused_indexes(&catalog, &reads, table))
    }

    pub async fn pk_exhaustion(&self, min_usage_pct: f64) -> AdvisorResult<Vec<PkUsage>> {
        let columns = with_timeout(
            "auto increment",
            self.config.timeouts.plan(),
            self.engine.auto_increment_columns(),
        )
        .await?;
        Ok(pk_exhaustion_report(&columns, min_usage_pct))
    }

    /// Tables by accumulated reads plus writes, busiest first.
    pub async fn table_activity(&self) -> AdvisorResult<Vec<(String, TableActivity)>> {
        Ok(rank_tables(self.store.table_activity().await?))
    }

    pub async fn refresh_statistics(&self, table: &str) -> AdvisorResult<()> {
        let _guard = self.run_guard.try_lock().map_err(|_| AdvisorError::AlreadyRunning)?;
        self.backtester().refresh_statistics(table).await
    }

    pub async fn optimize_table(&self, table: &str) -> AdvisorResult<()> {
        let _guard = self.run_guard.try_lock().map_err(|_| AdvisorError::AlreadyRunning)?;
        self.backtester().optimize_table(table).await
    }

    fn backtester(&self) -> Backtester<'_> {
        Backtester::new(self.engine.as_ref(), self.store.as_ref(), &self.config).with_policy(self.policy.as_ref())
    }

    async fn catalog(&self, table: Option<&str>) -> AdvisorResult<CatalogSnapshot> {
        let rows = with_timeout(
            "list indexes",
            self.config.timeouts.plan(),
            self.engine.list_indexes(table),
        )
        .await?;
        Ok(CatalogSnapshot::from_rows(&rows))
    }
}

pub fn rank_tables(activity: BTreeMap<String, TableActivity>) -> Vec<(String, TableActivity)> {
    let mut ranked: Vec<(String, TableActivity)> = activity.into_iter().collect();
    ranked.sort_by(|(a_name, a), (b_name, b)| b.total().cmp(&a.total()).then_with(|| a_name.cmp(b_name)));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::store::MemoryStore;
    use std::time::Duration;

    const ORDERS_SQL: &str = "SELECT * FROM orders WHERE customer_id = %s AND status = %s";

    fn setup(config: AdvisorConfig) -> (IndexAdvisor, Arc<MemoryEngine>, Arc<MemoryStore>) {
        let engine = Arc::new(MemoryEngine::new());
        engine.add_table("orders", 100_000, &["id", "customer_id", "status"]);
        engine.set_primary_key("orders", "id");
        let store = Arc::new(MemoryStore::new());
        let advisor = IndexAdvisor::new(config, engine.clone(), store.clone());
        (advisor, engine, store)
    }

    fn fast_retry() -> AdvisorConfig {
        let mut config = AdvisorConfig::default();
        config.recording.enabled = true;
        config.store.retry_attempts = 2;
        config.store.retry_backoff_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let (advisor, _, _) = setup(AdvisorConfig::default());
        let _held = advisor.run_guard.try_lock().unwrap();
        assert!(matches!(
            advisor.process(&RunFilter::default()).await,
            Err(AdvisorError::AlreadyRunning)
        ));
        assert!(matches!(
            advisor.optimize(&RunFilter::default(), &CancellationToken::new()).await,
            Err(AdvisorError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_store_outage_defers_batch() {
        let (advisor, _, store) = setup(fast_retry());
        let recorder = advisor.recorder();
        for _ in 0..5 {
            recorder.record(ORDERS_SQL, Duration::from_micros(10), &[]);
        }

        store.set_unavailable(true);
        let report = advisor.process(&RunFilter::default()).await.unwrap();
        assert_eq!(report.applied_batches, 0);
        assert_eq!(report.deferred_batches, 1);
        assert!(report.store_error.is_some());

        recorder.record(ORDERS_SQL, Duration::from_micros(10), &[]);
        store.set_unavailable(false);
        let report = advisor.process(&RunFilter::default()).await.unwrap();
        assert_eq!(report.applied_batches, 2);
        assert_eq!(report.deferred_batches, 0);

        let records = store.query_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].count, 6);
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried() {
        let (advisor, _, store) = setup(fast_retry());
        advisor.recorder().record(ORDERS_SQL, Duration::ZERO, &[]);
        store.fail_next_writes(1);
        let report = advisor.process(&RunFilter::default()).await.unwrap();
        assert_eq!(report.applied_batches, 1);
        assert!(report.store_error.is_none());
    }

    #[tokio::test]
    async fn test_drop_recording_discards_deferred() {
        let (advisor, _, store) = setup(fast_retry());
        advisor.recorder().record(ORDERS_SQL, Duration::ZERO, &[]);
        store.set_unavailable(true);
        advisor.process(&RunFilter::default()).await.unwrap();
        assert_eq!(advisor.deferred_batches(), 1);

        advisor.drop_recording();
        store.set_unavailable(false);
        let report = advisor.process(&RunFilter::default()).await.unwrap();
        assert_eq!(report.applied_batches, 0);
        assert!(store.query_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_candidate() {
        let (advisor, engine, _) = setup(fast_retry());
        let recorder = advisor.recorder();
        for _ in 0..60 {
            recorder.record(ORDERS_SQL, Duration::ZERO, &[]);
        }
        advisor.process(&RunFilter::default()).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = advisor.optimize(&RunFilter::default(), &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.candidates, 1);
        assert!(report.outcomes.is_empty());
        assert_eq!(engine.index_names("orders"), vec!["PRIMARY".to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_removes_vanished_tables() {
        let (advisor, engine, store) = setup(fast_retry());
        engine.add_table("legacy", 500, &[]);
        let recorder = advisor.recorder();
        for _ in 0..60 {
            recorder.record("SELECT * FROM legacy WHERE a = 1", Duration::ZERO, &[]);
            recorder.record(ORDERS_SQL, Duration::ZERO, &[]);
        }
        advisor.process(&RunFilter::default()).await.unwrap();
        assert_eq!(store.analyses().await.unwrap().len(), 2);

        engine.drop_table("legacy");
        let report = advisor.cleanup().await.unwrap();
        assert_eq!(report.missing_tables, vec!["legacy".to_string()]);
        assert_eq!(report.removed_queries, 1);
        assert_eq!(report.removed_analyses, 1);
        assert_eq!(report.removed_tables, 1);
        assert_eq!(store.query_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_table_activity_ranking() {
        let (advisor, _, _) = setup(fast_retry());
        let recorder = advisor.recorder();
        recorder.record("SELECT * FROM a", Duration::ZERO, &[]);
        recorder.record("SELECT * FROM b", Duration::ZERO, &[]);
        recorder.record("UPDATE b SET x = 1", Duration::ZERO, &[]);
        advisor.process(&RunFilter::default()).await.unwrap();

        let ranked = advisor.table_activity().await.unwrap();
        let names: Vec<&str> = ranked.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(ranked[0].1, TableActivity { reads: 1, writes: 1 });
    }

    #[tokio::test]
    async fn test_pk_exhaustion_and_index_inspection() {
        let (advisor, engine, _) = setup(AdvisorConfig::default());
        engine.set_auto_increment("orders", "id", "int(11)", 2_000_000_000);
        engine.add_index("orders", "idx_customer", &["customer_id"], false);
        engine.add_index("orders", "idx_customer_status", &["customer_id", "status"], false);

        let usage = advisor.pk_exhaustion(0.0).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].severity, crate::health::Severity::Red);

        let report = advisor.inspect_indexes(Some("orders")).await.unwrap();
        assert_eq!(report.redundant.len(), 1);
        assert_eq!(report.redundant[0].redundant, "idx_customer");
    }

    #[tokio::test]
    async fn test_unused_indexes() {
        let (advisor, engine, _) = setup(AdvisorConfig::default());
        engine.add_index("orders", "idx_customer", &["customer_id"], false);
        engine.add_index("orders", "idx_status", &["status"], false);
        engine.record_index_reads("orders", "idx_customer", 5_000);
        engine.record_index_reads("orders", "PRIMARY", 12);

        let unused = advisor.unused_indexes(Some("orders")).await.unwrap();
        let names: Vec<&str> = unused.iter().map(|u| u.index.as_str()).collect();
        assert_eq!(names, vec!["idx_status"]);
        assert!(advisor.unused_indexes(Some("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_table_maintenance_waits_for_run_guard() {
        let (advisor, engine, _) = setup(AdvisorConfig::default());
        {
            let _held = advisor.run_guard.try_lock().unwrap();
            assert!(matches!(
                advisor.refresh_statistics("orders").await,
                Err(AdvisorError::AlreadyRunning)
            ));
            assert!(matches!(
                advisor.optimize_table("orders").await,
                Err(AdvisorError::AlreadyRunning)
            ));
        }
        assert!(engine.ddl_log().is_empty());
        advisor.refresh_statistics("orders").await.unwrap();
        assert_eq!(engine.ddl_log().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_prunes_expired_history() {
        let (advisor, _, store) = setup(fast_retry());
        advisor.recorder().record(ORDERS_SQL, Duration::ZERO, &[]);
        advisor.process(&RunFilter::default()).await.unwrap();

        let mut expired = Aggregator::new().flush();
        expired.summary.window_end -= chrono::Duration::days(45);
        store.apply_batch(&expired).await.unwrap();
        assert_eq!(store.summaries().await.unwrap().len(), 2);

        let report = advisor.cleanup().await.unwrap();
        assert_eq!(report.pruned_summaries, 1);
        let left = store.summaries().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_ne!(left[0].batch_id, expired.id);
    }

    #[tokio::test]
    async fn test_unsaved_lifecycle_records_survive_store_outage() {
        let (advisor, engine, store) = setup(fast_retry());
        let recorder = advisor.recorder();
        for _ in 0..60 {
            recorder.record(ORDERS_SQL, Duration::ZERO, &[]);
        }
        advisor.process(&RunFilter::default()).await.unwrap();

        store.fail_next_writes(50);
        let report = advisor.optimize(&RunFilter::default(), &CancellationToken::new()).await.unwrap();
        let kept: Vec<String> = report.kept().map(|r| r.name.clone()).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(report.deferred_records, 1);
        assert!(store.managed_indexes().await.unwrap().is_empty());

        // still failing: reconcile refuses rather than treating the index as an orphan
        assert!(matches!(advisor.reconcile().await, Err(AdvisorError::Store(_))));
        assert!(engine.index_names("orders").contains(&kept[0]));

        store.fail_next_writes(0);
        let reconciled = advisor.reconcile().await.unwrap();
        assert!(reconciled.dropped.is_empty());
        assert_eq!(advisor.deferred_records(), 0);
        assert!(engine.index_names("orders").contains(&kept[0]));
        assert_eq!(
            store.managed_index(&kept[0]).await.unwrap().map(|r| r.state),
            Some(LifecycleState::Kept)
        );
    }
}
