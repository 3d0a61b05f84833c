//! Periodic worker.
//!
//! Drains the capture channel on a short tick, runs `process` on the
//! recording interval and `optimize` on the index-manager interval. Runs that
//! find the guard taken are skipped, not queued.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::advisor::IndexAdvisor;
use crate::analyzer::RunFilter;
use crate::capture::RecorderMode;
use crate::error::AdvisorError;

const DRAIN_TICK: Duration = Duration::from_millis(250);

pub struct Scheduler {
    advisor: Arc<IndexAdvisor>,
    shutdown_token: CancellationToken,
    drain_tick: Duration,
    process_period: Duration,
    optimize_period: Duration,
}

impl Scheduler {
    pub fn new(advisor: Arc<IndexAdvisor>) -> Self {
        let config = advisor.config();
        let process_period = config.recording.processing_interval.period();
        let optimize_period = config.index_manager.processing_interval.period();
        Self {
            advisor,
            shutdown_token: CancellationToken::new(),
            drain_tick: DRAIN_TICK,
            process_period,
            optimize_period,
        }
    }

    /// Override the periods, mostly for tests.
    pub fn with_periods(mut self, drain: Duration, process: Duration, optimize: Duration) -> Self {
        self.drain_tick = drain;
        self.process_period = process;
        self.optimize_period = optimize;
        self
    }

    /// Token that stops the loop; also cancels an optimization between
    /// candidates.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let start = Instant::now();
        let mut drain = interval_at(start + self.drain_tick, self.drain_tick);
        let mut process = interval_at(start + self.process_period, self.process_period);
        let mut optimize = interval_at(start + self.optimize_period, self.optimize_period);
        for timer in [&mut drain, &mut process, &mut optimize] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        tracing::info!(
            process_secs = self.process_period.as_secs(),
            optimize_secs = self.optimize_period.as_secs(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = drain.tick() => {
                    self.advisor.drain_capture();
                }
                _ = process.tick() => self.run_process().await,
                _ = optimize.tick() => self.run_optimize().await,
            }
        }

        tracing::info!("scheduler stopped");
    }

    async fn run_process(&self) {
        if self.advisor.recording_mode() != RecorderMode::Recording && !self.advisor.has_pending_work() {
            return;
        }
        match self.advisor.process(&RunFilter::default()).await {
            Ok(report) => {
                if let Some(err) = report.store_error {
                    tracing::warn!(error = %err, deferred = report.deferred_batches, "processing degraded");
                }
            }
            Err(AdvisorError::AlreadyRunning) => tracing::debug!("processing skipped, another run is active"),
            Err(err) => tracing::error!(error = %err, "processing failed"),
        }
    }

    async fn run_optimize(&self) {
        if !self.advisor.config().index_manager.enabled {
            return;
        }
        match self
            .advisor
            .optimize(&RunFilter::default(), &self.shutdown_token)
            .await
        {
            Ok(_) => {}
            Err(AdvisorError::AlreadyRunning) => tracing::debug!("optimization skipped, another run is active"),
            Err(err) => tracing::error!(error = %err, "optimization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvisorConfig;
    use crate::engine::MemoryEngine;
    use crate::store::{MemoryStore, MetadataStore};

    #[tokio::test]
    async fn test_scheduler_processes_and_stops() {
        let mut config = AdvisorConfig::default();
        config.recording.enabled = true;
        let store = Arc::new(MemoryStore::new());
        let advisor = Arc::new(IndexAdvisor::new(
            config,
            Arc::new(MemoryEngine::new()),
            store.clone(),
        ));
        advisor
            .recorder()
            .record("SELECT * FROM orders WHERE id = 1", Duration::ZERO, &[]);

        let scheduler = Scheduler::new(advisor).with_periods(
            Duration::from_millis(5),
            Duration::from_millis(20),
            Duration::from_secs(3600),
        );
        let token = scheduler.shutdown_token();
        let handle = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
        handle.await.unwrap();

        let records = store.query_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].count, 1);
    }

    fn spawn_fast(advisor: Arc<IndexAdvisor>) -> (CancellationToken, JoinHandle<()>) {
        let scheduler = Scheduler::new(advisor).with_periods(
            Duration::from_millis(5),
            Duration::from_millis(20),
            Duration::from_secs(3600),
        );
        let token = scheduler.shutdown_token();
        (token, scheduler.spawn())
    }

    #[tokio::test]
    async fn test_recording_started_at_runtime_is_processed() {
        let store = Arc::new(MemoryStore::new());
        let advisor = Arc::new(IndexAdvisor::new(
            AdvisorConfig::default(),
            Arc::new(MemoryEngine::new()),
            store.clone(),
        ));
        advisor.start_recording();
        advisor
            .recorder()
            .record("SELECT * FROM orders WHERE id = 1", Duration::ZERO, &[]);

        let (token, handle) = spawn_fast(advisor);
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
        handle.await.unwrap();

        let records = store.query_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].count, 1);
    }

    #[tokio::test]
    async fn test_stopped_recorder_still_flushes_captured() {
        let store = Arc::new(MemoryStore::new());
        let advisor = Arc::new(IndexAdvisor::new(
            AdvisorConfig::default(),
            Arc::new(MemoryEngine::new()),
            store.clone(),
        ));
        advisor.start_recording();
        advisor
            .recorder()
            .record("SELECT * FROM orders WHERE id = 1", Duration::ZERO, &[]);
        advisor.stop_recording();
        assert!(advisor.has_pending_work());

        let (token, handle) = spawn_fast(advisor.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(store.summaries().await.unwrap().len(), 1);
        assert!(!advisor.has_pending_work());
    }
}
