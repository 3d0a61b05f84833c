//! Plan analysis.
//!
//! Each sufficiently frequent statement is explained once. Tables the plan
//! reads (nearly) in full are flagged scan-heavy, and for those tables the
//! statement's predicates are broken down into column usages. Failures are
//! collected per fingerprint and never stop the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::capture::RecordedQuery;
use crate::config::AdvisorConfig;
use crate::engine::{DatabaseEngine, ExecutionPlanRow, with_timeout};
use crate::error::AdvisorError;
use crate::sql::{ColumnUsage, QueryFingerprint, StatementKind, column_usages, materialize_sample};

/// Restricts a run to one table and/or a different occurrence threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub table: Option<String>,
    /// Overrides `analysis.min_occurrence`
    pub min_occurrence: Option<u64>,
}

impl RunFilter {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: Some(name.into()),
            min_occurrence: None,
        }
    }
}

/// Explained statement with its scan verdicts and usages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub fingerprint: QueryFingerprint,
    /// Statement as explained, placeholders materialized
    pub sample: String,
    pub occurrence: u64,
    pub plan: Vec<ExecutionPlanRow>,
    pub scan_heavy_tables: Vec<String>,
    /// Usages on scan-heavy tables only
    pub usages: Vec<ColumnUsage>,
    /// Rows examined per table before any index was added
    pub baseline_rows: BTreeMap<String, u64>,
    /// Why usage extraction gave up, if it did
    pub parse_error: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl QueryAnalysis {
    /// Whether this analysis feeds candidate generation.
    pub fn is_seed(&self) -> bool {
        !self.scan_heavy_tables.is_empty() && !self.usages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub fingerprint: QueryFingerprint,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    pub analyses: Vec<QueryAnalysis>,
    pub failures: Vec<AnalysisFailure>,
    pub below_threshold: usize,
    pub not_explainable: usize,
    pub filtered_out: usize,
}

impl AnalysisReport {
    pub fn seeds(&self) -> impl Iterator<Item = &QueryAnalysis> {
        self.analyses.iter().filter(|a| a.is_seed())
    }
}

pub struct Analyzer<'a> {
    engine: &'a dyn DatabaseEngine,
    config: &'a AdvisorConfig,
    row_counts: HashMap<String, Option<u64>>,
}

impl<'a> Analyzer<'a> {
    pub fn new(engine: &'a dyn DatabaseEngine, config: &'a AdvisorConfig) -> Self {
        Self {
            engine,
            config,
            row_counts: HashMap::new(),
        }
    }

    pub async fn analyze(&mut self, queries: &[RecordedQuery], filter: &RunFilter) -> AnalysisReport {
        let threshold = filter
            .min_occurrence
            .unwrap_or(self.config.analysis.min_occurrence);
        let table_filter = filter
            .table
            .as_deref()
            .or(self.config.analysis.table_filter.as_deref());

        let mut report = AnalysisReport::default();
        for query in queries {
            if query.count <= threshold {
                report.below_threshold += 1;
                continue;
            }
            if !StatementKind::of(&query.sample).is_explainable() {
                report.not_explainable += 1;
                continue;
            }

            match self.analyze_one(query, table_filter).await {
                Ok(Some(analysis)) => report.analyses.push(analysis),
                Ok(None) => report.filtered_out += 1,
                Err(err) => {
                    tracing::warn!(
                        fingerprint = %query.fingerprint.digest(),
                        kind = err.kind(),
                        error = %err,
                        "skipping statement"
                    );
                    report.failures.push(AnalysisFailure {
                        fingerprint: query.fingerprint.clone(),
                        kind: err.kind().to_string(),
                        reason: err.message().to_string(),
                    });
                }
            }
        }

        tracing::info!(
            analyzed = report.analyses.len(),
            seeds = report.seeds().count(),
            failed = report.failures.len(),
            below_threshold = report.below_threshold,
            "analysis finished"
        );
        report
    }

    async fn analyze_one(
        &mut self,
        query: &RecordedQuery,
        table_filter: Option<&str>,
    ) -> Result<Option<QueryAnalysis>, AdvisorError> {
        let sample = materialize_sample(&query.sample);
        let plan = with_timeout(
            "explain",
            self.config.timeouts.plan(),
            self.engine.explain(&sample),
        )
        .await
        .map_err(|e| match AdvisorError::from(e) {
            AdvisorError::Ddl(msg) => AdvisorError::Plan(msg),
            other => other,
        })?;

        if let Some(table) = table_filter {
            if !plan.iter().any(|row| row.table == table) {
                return Ok(None);
            }
        }

        let mut baseline_rows: BTreeMap<String, u64> = BTreeMap::new();
        for row in &plan {
            let rows = baseline_rows.entry(row.table.clone()).or_default();
            *rows = (*rows).max(row.rows_examined);
        }

        let mut scan_heavy_tables = Vec::new();
        for row in &plan {
            if scan_heavy_tables.contains(&row.table) || !self.is_candidate_table(&row.table, table_filter) {
                continue;
            }
            if self.is_scan_heavy(row).await {
                scan_heavy_tables.push(row.table.clone());
            }
        }

        let mut usages = Vec::new();
        let mut parse_error = None;
        if !scan_heavy_tables.is_empty() {
            match column_usages(&sample, &query.fingerprint, query.count) {
                Ok(found) => {
                    usages = found
                        .into_iter()
                        .filter(|u| scan_heavy_tables.contains(&u.table))
                        .collect();
                }
                Err(err) => {
                    tracing::debug!(
                        fingerprint = %query.fingerprint.digest(),
                        error = %err,
                        "no usage extracted"
                    );
                    parse_error = Some(err.message().to_string());
                }
            }
        }

        Ok(Some(QueryAnalysis {
            fingerprint: query.fingerprint.clone(),
            sample,
            occurrence: query.count,
            plan,
            scan_heavy_tables,
            usages,
            baseline_rows,
            parse_error,
            analyzed_at: Utc::now(),
        }))
    }

    fn is_candidate_table(&self, table: &str, table_filter: Option<&str>) -> bool {
        if table_filter.is_some_and(|t| t != table) {
            return false;
        }
        !self
            .config
            .analysis
            .ignored_tables
            .iter()
            .any(|t| t == table)
    }

    async fn is_scan_heavy(&mut self, row: &ExecutionPlanRow) -> bool {
        let Some(total) = self.row_count(&row.table).await else {
            return false;
        };
        if total < self.config.analysis.min_table_rows {
            return false;
        }
        row.access.is_full_scan()
            || row.rows_examined as f64 >= self.config.analysis.scan_ratio * total as f64
    }

    /// Row count from the engine, cached for the run. Unknown counts are
    /// never scan-heavy.
    async fn row_count(&mut self, table: &str) -> Option<u64> {
        if let Some(cached) = self.row_counts.get(table) {
            return *cached;
        }
        let count = match with_timeout(
            "row count",
            self.config.timeouts.plan(),
            self.engine.table_row_count(table),
        )
        .await
        {
            Ok(count) => Some(count),
            Err(err) => {
                tracing::warn!(table, error = %err, "row count unavailable");
                None
            }
        };
        self.row_counts.insert(table.to_string(), count);
        count
    }
}
