use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::{MetadataStore, StoreError, StoreResult, StoreState};
use crate::analyzer::QueryAnalysis;
use crate::backtest::ManagedIndex;
use crate::capture::{RecordBatch, RecordSummary, RecordedQuery, TableActivity};
use crate::sql::QueryFingerprint;

/// Volatile store. Can be switched unavailable, or told to fail a number of
/// upcoming writes, to exercise retry paths.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    unavailable: AtomicBool,
    failing_writes: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> StoreResult<T> {
        self.check_available()?;
        Ok(f(&*self.state.read()))
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> StoreResult<T> {
        self.check_available()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(f(&mut *self.state.write()))
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn apply_batch(&self, batch: &RecordBatch) -> StoreResult<bool> {
        self.write(|s| s.apply_batch(batch))
    }

    async fn query_records(&self) -> StoreResult<Vec<RecordedQuery>> {
        self.read(StoreState::query_records)
    }

    async fn remove_queries(&self, fingerprints: &[QueryFingerprint]) -> StoreResult<usize> {
        self.write(|s| s.remove_queries(fingerprints))
    }

    async fn upsert_analysis(&self, analysis: &QueryAnalysis) -> StoreResult<()> {
        self.write(|s| s.upsert_analysis(analysis))
    }

    async fn analyses(&self) -> StoreResult<Vec<QueryAnalysis>> {
        self.read(StoreState::analyses)
    }

    async fn remove_analyses(&self, fingerprints: &[QueryFingerprint]) -> StoreResult<usize> {
        self.write(|s| s.remove_analyses(fingerprints))
    }

    async fn upsert_managed_index(&self, index: &ManagedIndex) -> StoreResult<()> {
        self.write(|s| s.upsert_managed_index(index))
    }

    async fn managed_index(&self, name: &str) -> StoreResult<Option<ManagedIndex>> {
        self.read(|s| s.managed_index(name))
    }

    async fn managed_indexes(&self) -> StoreResult<Vec<ManagedIndex>> {
        self.read(StoreState::managed_indexes)
    }

    async fn table_activity(&self) -> StoreResult<BTreeMap<String, TableActivity>> {
        self.read(StoreState::table_activity)
    }

    async fn remove_tables(&self, tables: &[String]) -> StoreResult<usize> {
        self.write(|s| s.remove_tables(tables))
    }

    async fn summaries(&self) -> StoreResult<Vec<RecordSummary>> {
        self.read(StoreState::summaries)
    }

    async fn prune_history(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        self.write(|s| s.prune_history(before))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Aggregator;

    #[tokio::test]
    async fn test_unavailable_store_rejects_everything() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let batch = Aggregator::new().flush();
        assert!(matches!(
            store.apply_batch(&batch).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.query_records().await.is_err());

        store.set_unavailable(false);
        assert_eq!(store.apply_batch(&batch).await, Ok(true));
    }

    #[tokio::test]
    async fn test_injected_write_failures_run_out() {
        let store = MemoryStore::new();
        store.fail_next_writes(2);
        let batch = Aggregator::new().flush();
        assert!(store.apply_batch(&batch).await.is_err());
        assert!(store.apply_batch(&batch).await.is_err());
        assert_eq!(store.apply_batch(&batch).await, Ok(true));
        assert_eq!(store.apply_batch(&batch).await, Ok(false));
    }
}
