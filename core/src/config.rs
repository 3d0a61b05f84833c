use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{AdvisorError, AdvisorResult};

pub const DEFAULT_CONFIG_PATH: &str = "autoindex.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingInterval {
    #[default]
    Hourly,
    Daily,
}

impl ProcessingInterval {
    pub fn period(self) -> Duration {
        match self {
            ProcessingInterval::Hourly => Duration::from_secs(60 * 60),
            ProcessingInterval::Daily => Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hourly" => Some(ProcessingInterval::Hourly),
            "daily" => Some(ProcessingInterval::Daily),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub processing_interval: ProcessingInterval,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexManagerConfig {
    pub enabled: bool,
    pub processing_interval: ProcessingInterval,
}

/// Which recorded statements get explained and when a plan counts as a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// A fingerprint is analyzed once its count exceeds this (default: 50)
    pub min_occurrence: u64,
    /// Rows examined over row count at which a plan is near-full (default: 0.3)
    pub scan_ratio: f64,
    /// Tables smaller than this are never scan-heavy (default: 100)
    pub min_table_rows: u64,
    /// Tables never analyzed
    pub ignored_tables: Vec<String>,
    /// Restrict runs to one table
    pub table_filter: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_occurrence: 50,
            scan_ratio: 0.3,
            min_table_rows: 100,
            ignored_tables: Vec::new(),
            table_filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    pub max_per_table: usize,
    /// Longer column lists are truncated
    pub max_columns: usize,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            max_per_table: 3,
            max_columns: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Relative improvement an index must reach to be kept (default: 10%)
    pub min_improvement_pct: f64,
    /// Keep every created index without measuring it
    pub skip_backtest: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            min_improvement_pct: 10.0,
            skip_backtest: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub plan_ms: u64,
    pub ddl_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            plan_ms: 5_000,
            ddl_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn plan(&self) -> Duration {
        Duration::from_millis(self.plan_ms)
    }

    pub fn ddl(&self) -> Duration {
        Duration::from_millis(self.ddl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    pub retry_attempts: u32,
    /// First retry delay; doubled on each further attempt
    pub retry_backoff_ms: u64,
    /// Batch summaries and applied batch ids older than this are pruned by
    /// cleanup
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "autoindex.json".into(),
            retry_attempts: 5,
            retry_backoff_ms: 200,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub recording: RecordingConfig,
    pub index_manager: IndexManagerConfig,
    pub analysis: AnalysisConfig,
    pub candidates: CandidateConfig,
    pub backtest: BacktestConfig,
    pub timeouts: TimeoutConfig,
    pub store: StoreConfig,
}

impl AdvisorConfig {
    /// Load from `AUTOINDEX_CONFIG` or `autoindex.toml`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> AdvisorResult<Self> {
        let path = env::var("AUTOINDEX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> AdvisorResult<Self> {
        let path = path.as_ref();
        let mut cfg = match fs::read_to_string(path) {
            Ok(s) => Self::from_toml(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(source: &str) -> AdvisorResult<Self> {
        toml::from_str(source).map_err(|e| AdvisorError::Config(e.to_string()))
    }

    /// Apply `AUTOINDEX_*` overrides through `lookup`. Unparsable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %value, "ignoring unparsable override");
                    None
                }
            }
        }

        if let Some(v) = parsed("AUTOINDEX_RECORDING_ENABLED", lookup("AUTOINDEX_RECORDING_ENABLED")) {
            self.recording.enabled = v;
        }
        if let Some(v) = lookup("AUTOINDEX_RECORDING_INTERVAL").and_then(|v| ProcessingInterval::parse(&v)) {
            self.recording.processing_interval = v;
        }
        if let Some(v) = parsed("AUTOINDEX_INDEX_MANAGER_ENABLED", lookup("AUTOINDEX_INDEX_MANAGER_ENABLED")) {
            self.index_manager.enabled = v;
        }
        if let Some(v) = lookup("AUTOINDEX_INDEX_MANAGER_INTERVAL").and_then(|v| ProcessingInterval::parse(&v)) {
            self.index_manager.processing_interval = v;
        }
        if let Some(v) = parsed("AUTOINDEX_MIN_OCCURRENCE", lookup("AUTOINDEX_MIN_OCCURRENCE")) {
            self.analysis.min_occurrence = v;
        }
        if let Some(v) = parsed("AUTOINDEX_MIN_IMPROVEMENT_PCT", lookup("AUTOINDEX_MIN_IMPROVEMENT_PCT")) {
            self.backtest.min_improvement_pct = v;
        }
        if let Some(v) = parsed("AUTOINDEX_MAX_PER_TABLE", lookup("AUTOINDEX_MAX_PER_TABLE")) {
            self.candidates.max_per_table = v;
        }
        if let Some(v) = parsed("AUTOINDEX_SKIP_BACKTEST", lookup("AUTOINDEX_SKIP_BACKTEST")) {
            self.backtest.skip_backtest = v;
        }
        if let Some(v) = parsed("AUTOINDEX_RETENTION_DAYS", lookup("AUTOINDEX_RETENTION_DAYS")) {
            self.store.retention_days = v;
        }
        if let Some(v) = lookup("AUTOINDEX_STORE_PATH") {
            self.store.path = v;
        }
    }

    /// The index manager consumes recordings, so enabling it enables the
    /// recorder.
    pub fn normalize(&mut self) {
        if self.index_manager.enabled && !self.recording.enabled {
            tracing::warn!("index manager requires query recording; enabling recording");
            self.recording.enabled = true;
        }
    }

    pub fn validate(&self) -> AdvisorResult<()> {
        let pct = self.backtest.min_improvement_pct;
        if !(0.0..=100.0).contains(&pct) {
            return Err(AdvisorError::Config(format!(
                "backtest.min_improvement_pct must be within 0..=100, got {pct}"
            )));
        }
        let ratio = self.analysis.scan_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(AdvisorError::Config(format!(
                "analysis.scan_ratio must be within (0, 1], got {ratio}"
            )));
        }
        if self.candidates.max_per_table == 0 || self.candidates.max_columns == 0 {
            return Err(AdvisorError::Config(
                "candidate limits must be at least 1".into(),
            ));
        }
        if self.timeouts.plan_ms == 0 || self.timeouts.ddl_ms == 0 {
            return Err(AdvisorError::Config("timeouts must be non-zero".into()));
        }
        if self.store.retry_attempts == 0 {
            return Err(AdvisorError::Config(
                "store.retry_attempts must be at least 1".into(),
            ));
        }
        if self.store.retention_days == 0 {
            return Err(AdvisorError::Config(
                "store.retention_days must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let cfg = AdvisorConfig::default();
        assert!(!cfg.recording.enabled);
        assert_eq!(cfg.analysis.min_occurrence, 50);
        assert_eq!(cfg.candidates.max_per_table, 3);
        assert_eq!(cfg.backtest.min_improvement_pct, 10.0);
        assert_eq!(cfg.timeouts.ddl(), Duration::from_secs(60));
        assert_eq!(cfg.store.retention_days, 30);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let cfg = AdvisorConfig::from_toml(
            r#"
            [index_manager]
            enabled = true
            processing_interval = "daily"

            [analysis]
            min_occurrence = 10
            ignored_tables = ["audit_log"]
            "#,
        )
        .unwrap();
        assert!(cfg.index_manager.enabled);
        assert_eq!(cfg.index_manager.processing_interval, ProcessingInterval::Daily);
        assert_eq!(cfg.analysis.min_occurrence, 10);
        assert_eq!(cfg.analysis.scan_ratio, 0.3);
        assert_eq!(cfg.analysis.ignored_tables, vec!["audit_log".to_string()]);
    }

    #[test]
    fn test_index_manager_enables_recording() {
        let mut cfg = AdvisorConfig::default();
        cfg.index_manager.enabled = true;
        cfg.normalize();
        assert!(cfg.recording.enabled);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AUTOINDEX_MIN_OCCURRENCE", "7"),
            ("AUTOINDEX_SKIP_BACKTEST", "true"),
            ("AUTOINDEX_RECORDING_INTERVAL", "Daily"),
            ("AUTOINDEX_MAX_PER_TABLE", "many"),
        ]
        .into_iter()
        .collect();

        let mut cfg = AdvisorConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.analysis.min_occurrence, 7);
        assert!(cfg.backtest.skip_backtest);
        assert_eq!(cfg.recording.processing_interval, ProcessingInterval::Daily);
        assert_eq!(cfg.candidates.max_per_table, 3);
    }

    #[test]
    fn test_validation() {
        let mut cfg = AdvisorConfig::default();
        cfg.backtest.min_improvement_pct = 150.0;
        assert!(matches!(cfg.validate(), Err(AdvisorError::Config(_))));

        let mut cfg = AdvisorConfig::default();
        cfg.analysis.scan_ratio = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AdvisorConfig::default();
        cfg.candidates.max_columns = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AdvisorConfig::default();
        cfg.store.retention_days = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autoindex.toml");
        std::fs::write(&path, "[candidates]\nmax_per_table = 2\n").unwrap();
        let cfg = AdvisorConfig::load_from_path(&path).unwrap();
        assert_eq!(cfg.candidates.max_per_table, 2);

        let missing = AdvisorConfig::load_from_path(dir.path().join("missing.toml")).unwrap();
        assert_eq!(missing.candidates.max_per_table, 3);

        std::fs::write(&path, "[candidates\n").unwrap();
        assert!(matches!(
            AdvisorConfig::load_from_path(&path),
            Err(AdvisorError::Config(_))
        ));
    }
}
