//! Concurrent counting store.
//!
//! Increments take the slot lock shared and update a sharded map, so
//! concurrent recorders only contend per shard. `flush` takes the slot lock
//! exclusively for the duration of one pointer swap; increments issued while
//! it waits land in the fresh table.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::models::{RecordBatch, RecordSummary, RecordedQuery, TableActivity};
use crate::sql::{OperationKind, QueryFingerprint};

struct CountingTable {
    queries: DashMap<QueryFingerprint, RecordedQuery>,
    tables: DashMap<String, TableActivity>,
    statements: AtomicU64,
    opened_at: DateTime<Utc>,
}

impl CountingTable {
    fn new() -> Self {
        Self {
            queries: DashMap::new(),
            tables: DashMap::new(),
            statements: AtomicU64::new(0),
            opened_at: Utc::now(),
        }
    }
}

pub struct Aggregator {
    slot: RwLock<CountingTable>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(CountingTable::new()),
        }
    }

    /// Count one execution of a statement shape.
    pub fn increment(
        &self,
        fingerprint: QueryFingerprint,
        sample: &str,
        kind: OperationKind,
        elapsed: Duration,
    ) {
        let now = Utc::now();
        let table = self.slot.read();
        table.statements.fetch_add(1, Ordering::Relaxed);

        let mut entry = table
            .queries
            .entry(fingerprint.clone())
            .or_insert_with(|| RecordedQuery::new(fingerprint, sample, kind, now));
        entry.count += 1;
        entry.total_time_us += elapsed.as_micros() as u64;
        entry.last_seen = now;
    }

    /// Bump read/write counters for each touched table.
    pub fn touch_tables(&self, tables: &[String], kind: OperationKind) {
        if kind == OperationKind::Other {
            return;
        }
        let table = self.slot.read();
        for name in tables {
            table.tables.entry(name.clone()).or_default().record(kind);
        }
    }

    /// Swap in an empty table and return the previous contents.
    pub fn flush(&self) -> RecordBatch {
        let previous = {
            let mut slot = self.slot.write();
            std::mem::replace(&mut *slot, CountingTable::new())
        };

        let id = Uuid::new_v4();
        let total_statements = previous.statements.load(Ordering::Relaxed);
        let mut queries: Vec<RecordedQuery> =
            previous.queries.into_iter().map(|(_, q)| q).collect();
        queries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        let tables: BTreeMap<String, TableActivity> = previous.tables.into_iter().collect();

        let summary = RecordSummary {
            batch_id: id,
            total_statements,
            unique_fingerprints: queries.len(),
            window_start: previous.opened_at,
            window_end: Utc::now(),
        };

        tracing::debug!(
            batch = %id,
            statements = total_statements,
            unique = queries.len(),
            "flushed capture batch"
        );

        RecordBatch {
            id,
            queries,
            tables,
            summary,
        }
    }

    /// Throw away everything counted since the last flush.
    pub fn discard(&self) {
        let mut slot = self.slot.write();
        *slot = CountingTable::new();
    }

    /// Statements counted since the last flush.
    pub fn pending_statements(&self) -> u64 {
        self.slot.read().statements.load(Ordering::Relaxed)
    }

    pub fn pending_fingerprints(&self) -> usize {
        self.slot.read().queries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn fp(s: &str) -> QueryFingerprint {
        QueryFingerprint::from(s)
    }

    #[test]
    fn test_increment_and_flush() {
        let agg = Aggregator::new();
        agg.increment(fp("SELECT ?"), "SELECT 1", OperationKind::Read, Duration::from_micros(10));
        agg.increment(fp("SELECT ?"), "SELECT 2", OperationKind::Read, Duration::from_micros(30));
        agg.increment(fp("DELETE FROM t"), "DELETE FROM t", OperationKind::Write, Duration::ZERO);

        let batch = agg.flush();
        assert_eq!(batch.summary.total_statements, 3);
        assert_eq!(batch.summary.unique_fingerprints, 2);
        assert_eq!(batch.summary.batch_id, batch.id);

        let select = batch
            .queries
            .iter()
            .find(|q| q.fingerprint == fp("SELECT ?"))
            .unwrap();
        assert_eq!(select.count, 2);
        assert_eq!(select.sample, "SELECT 1");
        assert_eq!(select.average_time_us(), 20);

        // flushed state is gone
        assert_eq!(agg.pending_statements(), 0);
        assert!(agg.flush().is_empty());
    }

    #[test]
    fn test_table_activity() {
        let agg = Aggregator::new();
        let tables = vec!["orders".to_string(), "customers".to_string()];
        agg.touch_tables(&tables, OperationKind::Read);
        agg.touch_tables(&tables[..1], OperationKind::Write);
        agg.touch_tables(&tables, OperationKind::Other);

        let batch = agg.flush();
        assert_eq!(batch.tables["orders"], TableActivity { reads: 1, writes: 1 });
        assert_eq!(batch.tables["customers"], TableActivity { reads: 1, writes: 0 });
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        let agg = Arc::new(Aggregator::new());
        let threads = 8;
        let per_thread = 2_500;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        agg.increment(fp("SELECT ?"), "SELECT 1", OperationKind::Read, Duration::ZERO);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let batch = agg.flush();
        assert_eq!(batch.queries.len(), 1);
        assert_eq!(batch.queries[0].count, threads * per_thread);
    }

    #[test]
    fn test_flush_during_increments_loses_nothing() {
        let agg = Arc::new(Aggregator::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        agg.increment(fp("SELECT ?"), "SELECT 1", OperationKind::Read, Duration::ZERO);
                    }
                })
            })
            .collect();

        let mut seen = 0;
        for _ in 0..20 {
            seen += agg.flush().summary.total_statements;
        }
        for w in writers {
            w.join().unwrap();
        }
        seen += agg.flush().summary.total_statements;
        assert_eq!(seen, 20_000);
    }

    #[test]
    fn test_discard() {
        let agg = Aggregator::new();
        agg.increment(fp("SELECT ?"), "SELECT 1", OperationKind::Read, Duration::ZERO);
        agg.discard();
        assert_eq!(agg.pending_fingerprints(), 0);
    }
}
