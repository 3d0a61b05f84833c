//! Statement capture and aggregation.

pub mod aggregator;
pub mod models;
pub mod recorder;

pub use aggregator::Aggregator;
pub use models::{RecordBatch, RecordSummary, RecordedQuery, TableActivity};
pub use recorder::{CapturePump, Recorder, RecorderMode};
