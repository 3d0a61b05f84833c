//! autoindex - workload-driven index advisor
//!
//! Statements are captured on the host's execution path, folded into
//! per-fingerprint counters and periodically analyzed. Frequent statements
//! whose plans scan whole tables yield index candidates, each of which is
//! created, measured against its baseline and then kept or dropped.

pub mod advisor;
pub mod analyzer;
pub mod backtest;
pub mod candidates;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod scheduler;
pub mod sql;
pub mod store;

pub use advisor::{CleanupReport, IndexAdvisor, OptimizeReport, ProcessReport, rank_tables};
pub use analyzer::{AnalysisReport, Analyzer, QueryAnalysis, RunFilter};
pub use backtest::{
    BacktestOutcome, Backtester, ImprovementPolicy, LifecycleState, ManagedIndex, RowsExaminedPolicy,
};
pub use candidates::{IndexCandidate, generate};
pub use capture::{Aggregator, RecordBatch, RecordedQuery, Recorder, RecorderMode, TableActivity};
pub use catalog::CatalogSnapshot;
pub use config::AdvisorConfig;
pub use engine::{DatabaseEngine, EngineError, MemoryEngine};
pub use error::{AdvisorError, AdvisorResult};
pub use scheduler::Scheduler;
pub use sql::{QueryFingerprint, fingerprint};
pub use store::{JsonFileStore, MemoryStore, MetadataStore, StoreError};
