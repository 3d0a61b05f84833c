//! Hot-path statement capture.
//!
//! `Recorder::record` only checks a flag and pushes onto an unbounded
//! channel. Classification, fingerprinting and counting happen when the
//! `CapturePump` drains the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::aggregator::Aggregator;
use crate::sql::{StatementKind, fingerprint, tables_touched};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderMode {
    Stopped,
    Recording,
}

struct CaptureEvent {
    generation: u64,
    sql: String,
    elapsed: Duration,
    tables: Vec<String>,
}

struct RecorderState {
    recording: AtomicBool,
    /// Bumped by `drop_pending`; events from older generations are ignored
    generation: AtomicU64,
    lost: AtomicU64,
}

/// Capture handle given to the host. Cheap to clone.
#[derive(Clone)]
pub struct Recorder {
    tx: UnboundedSender<CaptureEvent>,
    state: Arc<RecorderState>,
    aggregator: Arc<Aggregator>,
}

impl Recorder {
    pub fn new(aggregator: Arc<Aggregator>, recording: bool) -> (Self, CapturePump) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(RecorderState {
            recording: AtomicBool::new(recording),
            generation: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        });
        let recorder = Self {
            tx,
            state: Arc::clone(&state),
            aggregator: Arc::clone(&aggregator),
        };
        let pump = CapturePump {
            rx,
            state,
            aggregator,
        };
        (recorder, pump)
    }

    /// Record one executed statement. `tables` may be empty, in which case
    /// the touched tables are derived from the statement text.
    pub fn record(&self, sql: &str, elapsed: Duration, tables: &[&str]) {
        if !self.state.recording.load(Ordering::Relaxed) {
            return;
        }
        let event = CaptureEvent {
            generation: self.state.generation.load(Ordering::Acquire),
            sql: sql.to_string(),
            elapsed,
            tables: tables.iter().map(|t| t.to_string()).collect(),
        };
        if self.tx.send(event).is_err() {
            self.state.lost.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn start(&self) {
        if !self.state.recording.swap(true, Ordering::AcqRel) {
            tracing::info!("query recording started");
        }
    }

    pub fn stop(&self) {
        if self.state.recording.swap(false, Ordering::AcqRel) {
            tracing::info!("query recording stopped");
        }
    }

    pub fn mode(&self) -> RecorderMode {
        if self.state.recording.load(Ordering::Relaxed) {
            RecorderMode::Recording
        } else {
            RecorderMode::Stopped
        }
    }

    /// Discard everything captured but not yet flushed, including events
    /// still queued for the pump.
    pub fn drop_pending(&self) {
        self.state.generation.fetch_add(1, Ordering::AcqRel);
        self.aggregator.discard();
        tracing::info!("discarded unflushed capture state");
    }

    /// Events that could not be queued because the pump is gone.
    pub fn lost_events(&self) -> u64 {
        self.state.lost.load(Ordering::Relaxed)
    }
}

/// Consumer side of the capture channel.
pub struct CapturePump {
    rx: UnboundedReceiver<CaptureEvent>,
    state: Arc<RecorderState>,
    aggregator: Arc<Aggregator>,
}

impl CapturePump {
    /// Apply every queued event to the aggregator without waiting.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            if self.apply(event) {
                applied += 1;
            }
        }
        applied
    }

    fn apply(&self, event: CaptureEvent) -> bool {
        if event.generation != self.state.generation.load(Ordering::Acquire) {
            return false;
        }

        let kind = StatementKind::of(&event.sql).operation();
        let fp = fingerprint(&event.sql);
        if fp.is_empty() {
            return false;
        }
        self.aggregator.increment(fp, &event.sql, kind, event.elapsed);

        let tables = if event.tables.is_empty() {
            tables_touched(&event.sql)
        } else {
            event.tables
        };
        self.aggregator.touch_tables(&tables, kind);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TableActivity;

    #[test]
    fn test_stopped_recorder_is_noop() {
        let agg = Arc::new(Aggregator::new());
        let (recorder, mut pump) = Recorder::new(Arc::clone(&agg), false);
        recorder.record("SELECT 1", Duration::ZERO, &[]);
        assert_eq!(pump.drain(), 0);
        assert_eq!(recorder.mode(), RecorderMode::Stopped);
    }

    #[test]
    fn test_record_and_drain() {
        let agg = Arc::new(Aggregator::new());
        let (recorder, mut pump) = Recorder::new(Arc::clone(&agg), true);
        recorder.record("SELECT * FROM orders WHERE id = 1", Duration::from_micros(5), &[]);
        recorder.record("SELECT * FROM orders WHERE id = 2", Duration::from_micros(5), &[]);
        recorder.record("UPDATE orders SET a = 1", Duration::ZERO, &["orders"]);
        assert_eq!(pump.drain(), 3);

        let batch = agg.flush();
        assert_eq!(batch.summary.unique_fingerprints, 2);
        assert_eq!(batch.summary.total_statements, 3);
        assert_eq!(batch.tables["orders"], TableActivity { reads: 2, writes: 1 });
    }

    #[test]
    fn test_drop_pending_discards_queued_events() {
        let agg = Arc::new(Aggregator::new());
        let (recorder, mut pump) = Recorder::new(Arc::clone(&agg), true);
        recorder.record("SELECT 1", Duration::ZERO, &[]);
        pump.drain();
        recorder.record("SELECT 2", Duration::ZERO, &[]);
        recorder.drop_pending();
        assert_eq!(pump.drain(), 0);
        assert!(agg.flush().is_empty());

        recorder.record("SELECT 3", Duration::ZERO, &[]);
        assert_eq!(pump.drain(), 1);
    }

    #[test]
    fn test_start_stop() {
        let agg = Arc::new(Aggregator::new());
        let (recorder, mut pump) = Recorder::new(agg, false);
        recorder.start();
        recorder.record("SELECT 1", Duration::ZERO, &[]);
        recorder.stop();
        recorder.record("SELECT 2", Duration::ZERO, &[]);
        assert_eq!(pump.drain(), 1);
    }
}
