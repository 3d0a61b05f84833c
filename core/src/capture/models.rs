use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::sql::{OperationKind, QueryFingerprint};

/// Accumulated occurrences of one statement shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedQuery {
    pub fingerprint: QueryFingerprint,
    /// First raw statement seen for this shape
    pub sample: String,
    pub kind: OperationKind,
    pub count: u64,
    /// Summed execution time in microseconds
    pub total_time_us: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl RecordedQuery {
    pub fn new(
        fingerprint: QueryFingerprint,
        sample: impl Into<String>,
        kind: OperationKind,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            sample: sample.into(),
            kind,
            count: 0,
            total_time_us: 0,
            first_seen: seen_at,
            last_seen: seen_at,
        }
    }

    /// Add another record of the same fingerprint into this one.
    pub fn merge(&mut self, other: &RecordedQuery) {
        self.count += other.count;
        self.total_time_us += other.total_time_us;
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
    }

    pub fn average_time_us(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_time_us / self.count
        }
    }
}

/// Read/write counters for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableActivity {
    pub reads: u64,
    pub writes: u64,
}

impl TableActivity {
    pub fn total(&self) -> u64 {
        self.reads + self.writes
    }

    pub fn record(&mut self, kind: OperationKind) {
        match kind {
            OperationKind::Read => self.reads += 1,
            OperationKind::Write => self.writes += 1,
            OperationKind::Other => {}
        }
    }

    pub fn merge(&mut self, other: &TableActivity) {
        self.reads += other.reads;
        self.writes += other.writes;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub batch_id: Uuid,
    pub total_statements: u64,
    pub unique_fingerprints: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Immutable snapshot handed from the aggregator to the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub id: Uuid,
    /// Sorted by fingerprint
    pub queries: Vec<RecordedQuery>,
    pub tables: BTreeMap<String, TableActivity>,
    pub summary: RecordSummary,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.tables.is_empty()
    }
}
