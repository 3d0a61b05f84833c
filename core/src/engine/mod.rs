//! Database engine boundary: plan inspection, catalog introspection and DDL.

pub mod ddl;
pub mod mariadb;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub use ddl::{DdlStatement, Identifier, MANAGED_PREFIX, ManagedName};
#[cfg(feature = "mariadb")]
pub use mariadb::MariaDbEngine;
pub use memory::MemoryEngine;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Object not found: {0}")]
    ObjectMissing(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Lock wait exceeded: {0}")]
    LockContention(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Join/access type reported by `EXPLAIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    System,
    Const,
    EqRef,
    Ref,
    Fulltext,
    RefOrNull,
    IndexMerge,
    UniqueSubquery,
    IndexSubquery,
    Range,
    /// Full index scan
    Index,
    /// Full table scan
    All,
    Unknown,
}

impl AccessType {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "system" => AccessType::System,
            "const" => AccessType::Const,
            "eq_ref" => AccessType::EqRef,
            "ref" => AccessType::Ref,
            "fulltext" => AccessType::Fulltext,
            "ref_or_null" => AccessType::RefOrNull,
            "index_merge" => AccessType::IndexMerge,
            "unique_subquery" => AccessType::UniqueSubquery,
            "index_subquery" => AccessType::IndexSubquery,
            "range" => AccessType::Range,
            "index" => AccessType::Index,
            "all" => AccessType::All,
            _ => AccessType::Unknown,
        }
    }

    /// Reads every row of the table or of one of its indexes.
    pub fn is_full_scan(self) -> bool {
        matches!(self, AccessType::All | AccessType::Index)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessType::System => "system",
            AccessType::Const => "const",
            AccessType::EqRef => "eq_ref",
            AccessType::Ref => "ref",
            AccessType::Fulltext => "fulltext",
            AccessType::RefOrNull => "ref_or_null",
            AccessType::IndexMerge => "index_merge",
            AccessType::UniqueSubquery => "unique_subquery",
            AccessType::IndexSubquery => "index_subquery",
            AccessType::Range => "range",
            AccessType::Index => "index",
            AccessType::All => "ALL",
            AccessType::Unknown => "unknown",
        }
    }
}

/// One table line of an `EXPLAIN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlanRow {
    pub table: String,
    pub access: AccessType,
    pub rows_examined: u64,
    pub key: Option<String>,
}

/// One column of one index, as `INFORMATION_SCHEMA.STATISTICS` lists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub table: String,
    pub key_name: String,
    /// 1-based position within the index
    pub seq_in_index: u32,
    pub column: String,
    pub non_unique: bool,
}

/// Auto-increment counter and the declared type of its column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoIncrementColumn {
    pub table: String,
    pub column: String,
    /// Declared SQL type, e.g. `int(11) unsigned`
    pub column_type: String,
    pub auto_increment: u64,
}

/// Rows read through one index since the server's statistics were reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReads {
    pub table: String,
    pub index: String,
    pub rows_read: u64,
}

#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Execution plan for a statement without running it.
    async fn explain(&self, sql: &str) -> EngineResult<Vec<ExecutionPlanRow>>;

    async fn table_exists(&self, table: &str) -> EngineResult<bool>;

    /// Row count independent of any plan estimate.
    async fn table_row_count(&self, table: &str) -> EngineResult<u64>;

    /// Index catalog, optionally restricted to one table.
    async fn list_indexes(&self, table: Option<&str>) -> EngineResult<Vec<IndexColumn>>;

    async fn execute_ddl(&self, ddl: &DdlStatement) -> EngineResult<()>;

    async fn auto_increment_columns(&self) -> EngineResult<Vec<AutoIncrementColumn>>;

    /// Per-index read counters. Indexes never read since the last reset may
    /// be missing from the result.
    async fn index_reads(&self, table: Option<&str>) -> EngineResult<Vec<IndexReads>>;
}

/// Bound an engine call; expiry becomes [`EngineError::Timeout`].
pub async fn with_timeout<T, F>(what: &str, limit: Duration, call: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(format!(
            "{what} exceeded {}ms",
            limit.as_millis()
        ))),
    }
}
