//! Metadata store: accumulated query records, analyses, managed indexes.
//!
//! Every write is an idempotent upsert keyed by a stable identity, and batch
//! application is keyed by batch id, so replaying a batch after a failed
//! acknowledgement never double counts.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::analyzer::QueryAnalysis;
use crate::backtest::ManagedIndex;
use crate::capture::{RecordBatch, RecordSummary, RecordedQuery, TableActivity};
use crate::config::StoreConfig;
use crate::sql::QueryFingerprint;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Merge a flushed batch. Returns false when the batch id was already
    /// applied.
    async fn apply_batch(&self, batch: &RecordBatch) -> StoreResult<bool>;

    async fn query_records(&self) -> StoreResult<Vec<RecordedQuery>>;

    async fn remove_queries(&self, fingerprints: &[QueryFingerprint]) -> StoreResult<usize>;

    async fn upsert_analysis(&self, analysis: &QueryAnalysis) -> StoreResult<()>;

    async fn analyses(&self) -> StoreResult<Vec<QueryAnalysis>>;

    async fn remove_analyses(&self, fingerprints: &[QueryFingerprint]) -> StoreResult<usize>;

    async fn upsert_managed_index(&self, index: &ManagedIndex) -> StoreResult<()>;

    async fn managed_index(&self, name: &str) -> StoreResult<Option<ManagedIndex>>;

    async fn managed_indexes(&self) -> StoreResult<Vec<ManagedIndex>>;

    async fn table_activity(&self) -> StoreResult<BTreeMap<String, TableActivity>>;

    async fn remove_tables(&self, tables: &[String]) -> StoreResult<usize>;

    /// Batch summaries, oldest first.
    async fn summaries(&self) -> StoreResult<Vec<RecordSummary>>;

    /// Forget summaries, and the ids of their batches, whose window ended
    /// before `before`. Returns the number of summaries removed.
    async fn prune_history(&self, before: DateTime<Utc>) -> StoreResult<usize>;
}

/// Run a store call, retrying failures with doubling backoff. The last
/// error is returned once `retry_attempts` are used up.
pub async fn with_retry<T, F, Fut>(config: &StoreConfig, what: &str, mut call: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = config.retry_attempts.max(1);
    let mut delay = Duration::from_millis(config.retry_backoff_ms);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                tracing::warn!(what, attempt, error = %err, "store write failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Serializable contents shared by the store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    applied_batches: BTreeSet<Uuid>,
    #[serde(default)]
    queries: BTreeMap<QueryFingerprint, RecordedQuery>,
    #[serde(default)]
    analyses: BTreeMap<QueryFingerprint, QueryAnalysis>,
    #[serde(default)]
    managed: BTreeMap<String, ManagedIndex>,
    #[serde(default)]
    tables: BTreeMap<String, TableActivity>,
    #[serde(default)]
    summaries: Vec<RecordSummary>,
}

impl StoreState {
    pub fn apply_batch(&mut self, batch: &RecordBatch) -> bool {
        if !self.applied_batches.insert(batch.id) {
            return false;
        }
        for query in &batch.queries {
            self.queries
                .entry(query.fingerprint.clone())
                .and_modify(|existing| existing.merge(query))
                .or_insert_with(|| query.clone());
        }
        for (table, activity) in &batch.tables {
            self.tables.entry(table.clone()).or_default().merge(activity);
        }
        self.summaries.push(batch.summary.clone());
        true
    }

    pub fn query_records(&self) -> Vec<RecordedQuery> {
        self.queries.values().cloned().collect()
    }

    pub fn remove_queries(&mut self, fingerprints: &[QueryFingerprint]) -> usize {
        fingerprints
            .iter()
            .filter(|fp| self.queries.remove(fp).is_some())
            .count()
    }

    pub fn upsert_analysis(&mut self, analysis: &QueryAnalysis) {
        self.analyses
            .insert(analysis.fingerprint.clone(), analysis.clone());
    }

    pub fn analyses(&self) -> Vec<QueryAnalysis> {
        self.analyses.values().cloned().collect()
    }

    pub fn remove_analyses(&mut self, fingerprints: &[QueryFingerprint]) -> usize {
        fingerprints
            .iter()
            .filter(|fp| self.analyses.remove(fp).is_some())
            .count()
    }

    pub fn upsert_managed_index(&mut self, index: &ManagedIndex) {
        self.managed.insert(index.name.clone(), index.clone());
    }

    pub fn managed_index(&self, name: &str) -> Option<ManagedIndex> {
        self.managed.get(name).cloned()
    }

    pub fn managed_indexes(&self) -> Vec<ManagedIndex> {
        self.managed.values().cloned().collect()
    }

    pub fn table_activity(&self) -> BTreeMap<String, TableActivity> {
        self.tables.clone()
    }

    pub fn remove_tables(&mut self, tables: &[String]) -> usize {
        tables
            .iter()
            .filter(|t| self.tables.remove(t.as_str()).is_some())
            .count()
    }

    pub fn summaries(&self) -> Vec<RecordSummary> {
        self.summaries.clone()
    }

    pub fn prune_history(&mut self, before: DateTime<Utc>) -> usize {
        let (expired, kept): (Vec<RecordSummary>, Vec<RecordSummary>) = std::mem::take(&mut self.summaries)
            .into_iter()
            .partition(|s| s.window_end < before);
        self.summaries = kept;
        for summary in &expired {
            self.applied_batches.remove(&summary.batch_id);
        }
        expired.len()
    }
}
