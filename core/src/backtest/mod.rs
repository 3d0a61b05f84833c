//! Managed index lifecycle.
//!
//! A candidate moves `pending -> created -> measured -> kept | dropped`, or
//! to `failed` from any step. Every transition is persisted before the next
//! engine call, so an interrupted run leaves a record the next reconcile can
//! pick up. Only indexes carrying the managed name prefix are ever dropped.

pub mod policy;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use policy::{ImprovementPolicy, Measurement, RowsExaminedPolicy, exceeds_threshold};

use crate::candidates::{CandidateReason, IndexCandidate, reasons_for};
use crate::catalog::{CatalogSnapshot, TableIndex};
use crate::config::AdvisorConfig;
use crate::engine::{DatabaseEngine, DdlStatement, Identifier, ManagedName, with_timeout};
use crate::error::{AdvisorError, AdvisorResult};
use crate::store::{MetadataStore, with_retry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Created,
    Measured,
    Kept,
    Dropped,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Kept | LifecycleState::Dropped | LifecycleState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Created => "created",
            LifecycleState::Measured => "measured",
            LifecycleState::Kept => "kept",
            LifecycleState::Dropped => "dropped",
            LifecycleState::Failed => "failed",
        }
    }
}

/// An index this system created, with its measurement and verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedIndex {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub state: LifecycleState,
    pub created_at: Option<DateTime<Utc>>,
    pub baseline_rows: Option<u64>,
    pub after_rows: Option<u64>,
    pub improvement_pct: Option<f64>,
    pub reasons: Vec<CandidateReason>,
    pub failure: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedIndex {
    fn pending(name: &ManagedName, candidate: &IndexCandidate) -> Self {
        Self {
            name: name.to_string(),
            table: candidate.table.clone(),
            columns: candidate.columns.clone(),
            state: LifecycleState::Pending,
            created_at: None,
            baseline_rows: None,
            after_rows: None,
            improvement_pct: None,
            reasons: candidate.reasons.clone(),
            failure: None,
            updated_at: Utc::now(),
        }
    }

    /// Tagged catalog entry with no record of why it exists.
    fn orphan(table: &str, index: &TableIndex) -> Self {
        Self {
            name: index.name.clone(),
            table: table.to_string(),
            columns: index.columns.clone(),
            state: LifecycleState::Created,
            created_at: None,
            baseline_rows: None,
            after_rows: None,
            improvement_pct: None,
            reasons: Vec::new(),
            failure: None,
            updated_at: Utc::now(),
        }
    }

    fn transition(&mut self, state: LifecycleState) {
        tracing::debug!(
            index = %self.name,
            table = %self.table,
            from = self.state.as_str(),
            to = state.as_str(),
            "managed index transition"
        );
        self.state = state;
        self.updated_at = Utc::now();
    }

    fn fail(&mut self, reason: String) {
        tracing::warn!(index = %self.name, table = %self.table, reason = %reason, "managed index failed");
        self.failure = Some(reason);
        self.transition(LifecycleState::Failed);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BacktestOutcome {
    /// The catalog already has an index with exactly these columns
    AlreadyServed { index: String },
    /// Identifiers did not pass validation; nothing was executed
    Rejected { reason: String },
    Finished(ManagedIndex),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub kept: Vec<String>,
    pub dropped: Vec<String>,
    pub failed: Vec<String>,
    /// Unfinished records whose index is no longer in the catalog
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedIndex {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
}

pub struct Backtester<'a> {
    engine: &'a dyn DatabaseEngine,
    store: &'a dyn MetadataStore,
    config: &'a AdvisorConfig,
    policy: &'a dyn ImprovementPolicy,
    /// Latest record per index that could not be written
    unsaved: Mutex<BTreeMap<String, ManagedIndex>>,
}

impl<'a> Backtester<'a> {
    pub fn new(
        engine: &'a dyn DatabaseEngine,
        store: &'a dyn MetadataStore,
        config: &'a AdvisorConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
            policy: &RowsExaminedPolicy,
            unsaved: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: &'a dyn ImprovementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Records whose last transition the store did not accept, for the
    /// caller to write once it is reachable again.
    pub fn take_unsaved(&self) -> Vec<ManagedIndex> {
        std::mem::take(&mut *self.unsaved.lock()).into_values().collect()
    }

    /// Create the candidate's index, measure it and keep or drop it.
    pub async fn backtest(&self, candidate: &IndexCandidate, catalog: &CatalogSnapshot) -> BacktestOutcome {
        let ddl = match DdlStatement::create_index(&candidate.table, &candidate.columns) {
            Ok(ddl) => ddl,
            Err(err) => {
                tracing::warn!(table = %candidate.table, columns = ?candidate.columns, error = %err, "candidate rejected");
                return BacktestOutcome::Rejected {
                    reason: err.message().to_string(),
                };
            }
        };
        let Some(name) = ddl.index_name() else {
            return BacktestOutcome::Rejected {
                reason: "statement does not name an index".into(),
            };
        };

        if let Some(existing) = catalog.find_exact(&candidate.table, &candidate.columns) {
            tracing::debug!(table = %candidate.table, index = %existing.name, "columns already indexed");
            return BacktestOutcome::AlreadyServed {
                index: existing.name.clone(),
            };
        }

        let mut record = ManagedIndex::pending(name, candidate);
        self.persist(&record).await;

        let created = with_timeout(
            "create index",
            self.config.timeouts.ddl(),
            self.engine.execute_ddl(&ddl),
        )
        .await;
        if let Err(err) = created {
            record.fail(format!("create failed: {err}"));
            self.persist(&record).await;
            return BacktestOutcome::Finished(record);
        }

        record.created_at = Some(Utc::now());
        record.transition(LifecycleState::Created);
        self.persist(&record).await;
        tracing::info!(index = %record.name, table = %record.table, columns = ?record.columns, "index created");

        if self.config.backtest.skip_backtest {
            record.transition(LifecycleState::Kept);
            self.persist(&record).await;
            return BacktestOutcome::Finished(record);
        }

        if let Err(err) = self.refresh_statistics(&record.table).await {
            tracing::warn!(table = %record.table, error = %err, "statistics refresh failed");
        }
        self.measure_and_decide(&mut record).await;
        BacktestOutcome::Finished(record)
    }

    /// Finish tagged indexes left behind by interrupted or failed runs, and
    /// close records whose index disappeared. Unfinished records that cannot
    /// be measured are dropped; a tagged index with no record at all is left
    /// in place and reported as failed.
    pub async fn reconcile(&self) -> AdvisorResult<ReconcileReport> {
        let catalog = self.catalog(None).await?;
        let analyses = self.store.analyses().await?;
        let records: BTreeMap<String, ManagedIndex> = self
            .store
            .managed_indexes()
            .await?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        let mut report = ReconcileReport::default();
        for (table, index) in catalog.managed() {
            // an index never confirmed as created by a recorded run
            let (mut record, orphan) = match records.get(&index.name) {
                Some(r) if r.state == LifecycleState::Kept => continue,
                Some(r) => (r.clone(), r.created_at.is_none() && r.state == LifecycleState::Failed),
                None => (ManagedIndex::orphan(table, index), true),
            };
            record.table = table.to_string();
            record.columns = index.columns.clone();
            record.failure = None;
            if !record.reasons.iter().any(|r| r.baseline_rows > 0) {
                record.reasons = reasons_for(&analyses, table, &record.columns);
            }

            // without a record the index may have been kept by a run whose
            // writes were lost
            if orphan && record.reasons.is_empty() {
                record.fail("no measurable statements, left in place".into());
                self.persist(&record).await;
                report.failed.push(record.name);
                continue;
            }
            self.measure_and_decide(&mut record).await;
            let bucket = match record.state {
                LifecycleState::Kept => &mut report.kept,
                LifecycleState::Dropped => &mut report.dropped,
                _ => &mut report.failed,
            };
            bucket.push(record.name);
        }

        for record in records.values() {
            if record.state.is_terminal() || catalog.contains(&record.table, &record.name) {
                continue;
            }
            let mut record = record.clone();
            record.fail("index missing from catalog".into());
            self.persist(&record).await;
            report.missing.push(record.name);
        }

        tracing::info!(
            kept = report.kept.len(),
            dropped = report.dropped.len(),
            failed = report.failed.len(),
            missing = report.missing.len(),
            "reconcile finished"
        );
        Ok(report)
    }

    /// Drop every tagged index, optionally on one table. Indexes without the
    /// managed prefix are never touched.
    pub async fn drop_managed(&self, table: Option<&str>, dry_run: bool) -> AdvisorResult<Vec<DroppedIndex>> {
        let catalog = self.catalog(table).await?;
        let mut dropped = Vec::new();

        for (table, index) in catalog.managed() {
            let entry = DroppedIndex {
                table: table.to_string(),
                name: index.name.clone(),
                columns: index.columns.clone(),
            };
            if dry_run {
                dropped.push(entry);
                continue;
            }
            if let Err(err) = self.drop_index(table, &index.name).await {
                tracing::warn!(table, index = %index.name, error = %err, "drop failed");
                continue;
            }
            match self.store.managed_index(&index.name).await {
                Ok(Some(mut record)) => {
                    record.transition(LifecycleState::Dropped);
                    self.persist(&record).await;
                }
                Ok(None) => {}
                Err(err) => tracing::error!(index = %index.name, error = %err, "could not load managed index record"),
            }
            tracing::info!(table, index = %index.name, "managed index dropped");
            dropped.push(entry);
        }
        Ok(dropped)
    }

    /// `ANALYZE TABLE` so the planner sees a freshly created index.
    pub async fn refresh_statistics(&self, table: &str) -> AdvisorResult<()> {
        let ddl = DdlStatement::AnalyzeTable(Identifier::new(table)?);
        with_timeout("analyze table", self.config.timeouts.ddl(), self.engine.execute_ddl(&ddl)).await?;
        Ok(())
    }

    pub async fn optimize_table(&self, table: &str) -> AdvisorResult<()> {
        let ddl = DdlStatement::OptimizeTable(Identifier::new(table)?);
        with_timeout("optimize table", self.config.timeouts.ddl(), self.engine.execute_ddl(&ddl)).await?;
        tracing::info!(table, "table optimized");
        Ok(())
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

    async fn measure_and_decide(&self, record: &mut ManagedIndex) {
        let measurement = self.measure(&record.table, &record.reasons).await;
        record.baseline_rows = measurement.map(|m| m.baseline_rows);
        record.after_rows = measurement.map(|m| m.after_rows);
        record.improvement_pct = measurement.and_then(|m| self.policy.improvement_pct(&m));
        record.transition(LifecycleState::Measured);
        self.persist(record).await;

        let min = self.config.backtest.min_improvement_pct;
        if exceeds_threshold(record.improvement_pct, min) {
            tracing::info!(
                index = %record.name,
                improvement_pct = ?record.improvement_pct,
                policy = self.policy.name(),
                "index kept"
            );
            record.transition(LifecycleState::Kept);
            self.persist(record).await;
            return;
        }

        match self.drop_index(&record.table, &record.name).await {
            Ok(()) => {
                tracing::info!(
                    index = %record.name,
                    improvement_pct = ?record.improvement_pct,
                    min_improvement_pct = min,
                    "index dropped"
                );
                record.transition(LifecycleState::Dropped);
            }
            Err(err) => record.fail(format!("drop failed: {err}")),
        }
        self.persist(record).await;
    }

    /// Re-explain the contributing statements against the current catalog.
    async fn measure(&self, table: &str, reasons: &[CandidateReason]) -> Option<Measurement> {
        let mut total = Measurement {
            baseline_rows: 0,
            after_rows: 0,
        };
        let mut measured = 0;

        for reason in reasons.iter().filter(|r| r.baseline_rows > 0) {
            let plan = match with_timeout(
                "explain",
                self.config.timeouts.plan(),
                self.engine.explain(&reason.sample),
            )
            .await
            {
                Ok(plan) => plan,
                Err(err) => {
                    tracing::warn!(fingerprint = %reason.fingerprint.digest(), error = %err, "re-explain failed");
                    continue;
                }
            };
            let Some(after) = plan
                .iter()
                .filter(|row| row.table == table)
                .map(|row| row.rows_examined)
                .max()
            else {
                continue;
            };
            total.baseline_rows += reason.baseline_rows;
            total.after_rows += after;
            measured += 1;
        }

        (measured > 0).then_some(total)
    }

    async fn drop_index(&self, table: &str, name: &str) -> AdvisorResult<()> {
        let managed = ManagedName::parse(name)
            .ok_or_else(|| AdvisorError::Validation(format!("refusing to drop unmanaged index {name}")))?;
        let ddl = DdlStatement::drop_index(table, &managed)?;
        with_timeout("drop index", self.config.timeouts.ddl(), self.engine.execute_ddl(&ddl)).await?;
        Ok(())
    }

    /// Write a transition, retrying like batch writes. A record that still
    /// fails is held for [`Backtester::take_unsaved`].
    async fn persist(&self, record: &ManagedIndex) {
        let written = with_retry(&self.config.store, "managed index", || {
            self.store.upsert_managed_index(record)
        })
        .await;
        let mut unsaved = self.unsaved.lock();
        match written {
            Ok(()) => {
                unsaved.remove(&record.name);
            }
            Err(err) => {
                tracing::error!(index = %record.name, state = record.state.as_str(), error = %err, "could not persist managed index");
                unsaved.insert(record.name.clone(), record.clone());
            }
        }
    }
}
