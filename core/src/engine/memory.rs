//! In-process engine used by tests and dry runs.
//!
//! Tables have a row count, an optional column list and a set of indexes.
//! `EXPLAIN` is simulated from the statement's predicates: an index whose
//! leading columns are equality-filtered divides the examined rows by each
//! column's selectivity, a following range column divides them by three, and
//! without a usable index the plan is a full scan.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::{
    AccessType, AutoIncrementColumn, DatabaseEngine, DdlStatement, EngineError, EngineResult,
    ExecutionPlanRow, IndexColumn, IndexReads,
};
use crate::sql::lexer::tokenize;
use crate::sql::predicate::{UsageRole, UsedColumn, extract_usage};
use crate::sql::statement::{StatementKind, table_refs};

const DEFAULT_SELECTIVITY: u64 = 10;
const RANGE_SELECTIVITY: u64 = 3;

#[derive(Debug, Clone)]
struct SimIndex {
    columns: Vec<String>,
    unique: bool,
}

#[derive(Debug, Clone, Default)]
struct SimTable {
    rows: u64,
    /// Empty means any column is accepted
    columns: Vec<String>,
    indexes: BTreeMap<String, SimIndex>,
    selectivity: HashMap<String, u64>,
    auto_increment: Option<AutoIncrementColumn>,
    /// Only indexes that were read have an entry
    reads: BTreeMap<String, u64>,
}

impl SimTable {
    fn has_column(&self, column: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c == column)
    }

    fn selectivity(&self, column: &str) -> u64 {
        self.selectivity
            .get(column)
            .copied()
            .unwrap_or(DEFAULT_SELECTIVITY)
            .max(1)
    }
}

#[derive(Default)]
struct EngineState {
    tables: HashMap<String, SimTable>,
    explain_failures: Vec<(String, EngineError)>,
    ddl_failures: Vec<(String, EngineError)>,
    explain_delay: Option<Duration>,
    ddl_delay: Option<Duration>,
    ddl_log: Vec<String>,
}

#[derive(Default)]
pub struct MemoryEngine {
    state: RwLock<EngineState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, name: &str, rows: u64, columns: &[&str]) {
        self.state.write().tables.insert(
            name.to_string(),
            SimTable {
                rows,
                columns: columns.iter().map(|c| c.to_string()).collect(),
                ..Default::default()
            },
        );
    }

    pub fn add_index(&self, table: &str, name: &str, columns: &[&str], unique: bool) {
        if let Some(t) = self.state.write().tables.get_mut(table) {
            t.indexes.insert(
                name.to_string(),
                SimIndex {
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                    unique,
                },
            );
        }
    }

    pub fn set_primary_key(&self, table: &str, column: &str) {
        self.add_index(table, "PRIMARY", &[column], true);
    }

    /// Rows matched by one equality value are `rows / divisor`.
    pub fn set_selectivity(&self, table: &str, column: &str, divisor: u64) {
        if let Some(t) = self.state.write().tables.get_mut(table) {
            t.selectivity.insert(column.to_string(), divisor);
        }
    }

    pub fn set_auto_increment(&self, table: &str, column: &str, column_type: &str, value: u64) {
        if let Some(t) = self.state.write().tables.get_mut(table) {
            t.auto_increment = Some(AutoIncrementColumn {
                table: table.to_string(),
                column: column.to_string(),
                column_type: column_type.to_string(),
                auto_increment: value,
            });
        }
    }

    /// Add to an index's read counter.
    pub fn record_index_reads(&self, table: &str, index: &str, rows: u64) {
        if let Some(t) = self.state.write().tables.get_mut(table) {
            *t.reads.entry(index.to_string()).or_default() += rows;
        }
    }

    pub fn drop_table(&self, table: &str) {
        self.state.write().tables.remove(table);
    }

    /// Fail `EXPLAIN` for statements containing `pattern`.
    pub fn fail_explain_on(&self, pattern: &str, error: EngineError) {
        self.state
            .write()
            .explain_failures
            .push((pattern.to_string(), error));
    }

    /// Fail DDL whose rendered SQL contains `pattern`.
    pub fn fail_ddl_on(&self, pattern: &str, error: EngineError) {
        self.state
            .write()
            .ddl_failures
            .push((pattern.to_string(), error));
    }

    pub fn set_explain_delay(&self, delay: Option<Duration>) {
        self.state.write().explain_delay = delay;
    }

    pub fn set_ddl_delay(&self, delay: Option<Duration>) {
        self.state.write().ddl_delay = delay;
    }

    /// Successfully executed DDL, in order.
    pub fn ddl_log(&self) -> Vec<String> {
        self.state.read().ddl_log.clone()
    }

    pub fn index_names(&self, table: &str) -> Vec<String> {
        self.state
            .read()
            .tables
            .get(table)
            .map(|t| t.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn index_columns(&self, table: &str, name: &str) -> Option<Vec<String>> {
        self.state
            .read()
            .tables
            .get(table)
            .and_then(|t| t.indexes.get(name))
            .map(|i| i.columns.clone())
    }

    fn plan(&self, sql: &str) -> EngineResult<Vec<ExecutionPlanRow>> {
        let state = self.state.read();

        if let Some((_, err)) = state
            .explain_failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(err.clone());
        }

        if !StatementKind::of(sql).is_explainable() {
            return Err(EngineError::Syntax(format!("cannot explain {sql:?}")));
        }

        let tokens = tokenize(sql).map_err(|e| EngineError::Syntax(e.to_string()))?;
        let groups = extract_usage(sql).unwrap_or_default();

        let mut plan = Vec::new();
        for table_ref in table_refs(&tokens).into_iter().filter(|r| r.depth == 0) {
            let table = state
                .tables
                .get(&table_ref.name)
                .ok_or_else(|| EngineError::ObjectMissing(table_ref.name.clone()))?;
            plan.push(plan_table(&table_ref.name, table, &groups));
        }
        Ok(plan)
    }
}

fn plan_table(name: &str, table: &SimTable, groups: &[Vec<UsedColumn>]) -> ExecutionPlanRow {
    let full_scan = ExecutionPlanRow {
        table: name.to_string(),
        access: AccessType::All,
        rows_examined: table.rows,
        key: None,
    };

    let relevant: Vec<Vec<&UsedColumn>> = groups
        .iter()
        .map(|g| g.iter().filter(|c| c.table == name).collect::<Vec<_>>())
        .filter(|g| !g.is_empty())
        .collect();

    match relevant.len() {
        0 => full_scan,
        1 => best_index(table, &relevant[0])
            .map(|(key, access, rows)| ExecutionPlanRow {
                table: name.to_string(),
                access,
                rows_examined: rows,
                key: Some(key),
            })
            .unwrap_or(full_scan),
        _ => {
            // every disjunct needs its own index for a merge
            let mut keys = Vec::new();
            let mut rows = 0u64;
            for group in &relevant {
                match best_index(table, group) {
                    Some((key, _, r)) => {
                        keys.push(key);
                        rows += r;
                    }
                    None => return full_scan,
                }
            }
            if rows >= table.rows {
                return full_scan;
            }
            ExecutionPlanRow {
                table: name.to_string(),
                access: AccessType::IndexMerge,
                rows_examined: rows,
                key: Some(keys.join(",")),
            }
        }
    }
}

/// Cheapest index lookup for one conjunctive group, if any beats a scan.
fn best_index(table: &SimTable, group: &[&UsedColumn]) -> Option<(String, AccessType, u64)> {
    let has = |column: &str, role: UsageRole| {
        group
            .iter()
            .any(|c| c.column == column && c.role == role)
    };

    let mut best: Option<(String, AccessType, u64)> = None;
    for (name, index) in &table.indexes {
        let mut rows = table.rows;
        let mut matched = 0;
        for column in &index.columns {
            if !has(column, UsageRole::Equality) {
                break;
            }
            rows /= table.selectivity(column);
            matched += 1;
        }

        let mut access = if matched > 0 {
            if index.unique && matched == index.columns.len() {
                rows = 1;
                AccessType::EqRef
            } else {
                AccessType::Ref
            }
        } else {
            AccessType::All
        };

        if let Some(next) = index.columns.get(matched) {
            if has(next, UsageRole::Range) {
                rows /= RANGE_SELECTIVITY;
                access = AccessType::Range;
            }
        }

        if access == AccessType::All {
            continue;
        }
        let rows = rows.max(1);
        if rows >= table.rows {
            continue;
        }
        if best.as_ref().is_none_or(|(_, _, r)| rows < *r) {
            best = Some((name.clone(), access, rows));
        }
    }
    best
}

#[async_trait]
impl DatabaseEngine for MemoryEngine {
    async fn explain(&self, sql: &str) -> EngineResult<Vec<ExecutionPlanRow>> {
        let delay = self.state.read().explain_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.plan(sql)
    }

    async fn table_exists(&self, table: &str) -> EngineResult<bool> {
        Ok(self.state.read().tables.contains_key(table))
    }

    async fn table_row_count(&self, table: &str) -> EngineResult<u64> {
        self.state
            .read()
            .tables
            .get(table)
            .map(|t| t.rows)
            .ok_or_else(|| EngineError::ObjectMissing(table.to_string()))
    }

    async fn list_indexes(&self, table: Option<&str>) -> EngineResult<Vec<IndexColumn>> {
        let state = self.state.read();
        let mut names: Vec<&String> = state
            .tables
            .keys()
            .filter(|name| table.is_none_or(|t| t == name.as_str()))
            .collect();
        names.sort();

        let mut rows = Vec::new();
        for name in names {
            for (key_name, index) in &state.tables[name].indexes {
                for (seq, column) in index.columns.iter().enumerate() {
                    rows.push(IndexColumn {
                        table: name.clone(),
                        key_name: key_name.clone(),
                        seq_in_index: seq as u32 + 1,
                        column: column.clone(),
                        non_unique: !index.unique,
                    });
                }
            }
        }
        Ok(rows)
    }

    async fn execute_ddl(&self, ddl: &DdlStatement) -> EngineResult<()> {
        let delay = self.state.read().ddl_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let sql = ddl.to_sql();
        let mut state = self.state.write();
        if let Some((_, err)) = state
            .ddl_failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(err.clone());
        }

        let table_name = ddl.table().as_str().to_string();
        let table = state
            .tables
            .get_mut(&table_name)
            .ok_or_else(|| EngineError::ObjectMissing(table_name.clone()))?;

        match ddl {
            DdlStatement::CreateIndex { name, columns, .. } => {
                if table.indexes.contains_key(name.as_str()) {
                    return Err(EngineError::DuplicateName(name.to_string()));
                }
                if let Some(missing) = columns.iter().find(|c| !table.has_column(c.as_str())) {
                    return Err(EngineError::ObjectMissing(format!(
                        "column {table_name}.{missing}"
                    )));
                }
                table.indexes.insert(
                    name.to_string(),
                    SimIndex {
                        columns: columns.iter().map(|c| c.to_string()).collect(),
                        unique: false,
                    },
                );
            }
            DdlStatement::DropIndex { name, .. } => {
                if table.indexes.remove(name.as_str()).is_none() {
                    return Err(EngineError::ObjectMissing(format!(
                        "index {table_name}.{name}"
                    )));
                }
                table.reads.remove(name.as_str());
            }
            DdlStatement::AnalyzeTable(_) | DdlStatement::OptimizeTable(_) => {}
        }

        state.ddl_log.push(sql);
        Ok(())
    }

    async fn auto_increment_columns(&self) -> EngineResult<Vec<AutoIncrementColumn>> {
        let state = self.state.read();
        let mut columns: Vec<AutoIncrementColumn> = state
            .tables
            .values()
            .filter_map(|t| t.auto_increment.clone())
            .collect();
        columns.sort_by(|a, b| a.table.cmp(&b.table));
        Ok(columns)
    }

    async fn index_reads(&self, table: Option<&str>) -> EngineResult<Vec<IndexReads>> {
        let state = self.state.read();
        let mut reads: Vec<IndexReads> = state
            .tables
            .iter()
            .filter(|(name, _)| table.is_none_or(|t| t == name.as_str()))
            .flat_map(|(name, t)| {
                t.reads.iter().map(move |(index, rows)| IndexReads {
                    table: name.clone(),
                    index: index.clone(),
                    rows_read: *rows,
                })
            })
            .collect();
        reads.sort_by(|a, b| (&a.table, &a.index).cmp(&(&b.table, &b.index)));
        Ok(reads)
    }
}
