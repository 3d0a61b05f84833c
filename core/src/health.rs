//! Auto-increment exhaustion report.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::AutoIncrementColumn;

lazy_static! {
    static ref DISPLAY_WIDTH: Regex = Regex::new(r"\(\d+\)").unwrap();
    static ref SPACES: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Green,
    Yellow,
    Red,
}

impl Severity {
    pub fn classify(usage_pct: f64) -> Self {
        if usage_pct >= 80.0 {
            Severity::Red
        } else if usage_pct >= 50.0 {
            Severity::Yellow
        } else {
            Severity::Green
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Green => "green",
            Severity::Yellow => "yellow",
            Severity::Red => "red",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkUsage {
    pub table: String,
    pub column: String,
    pub auto_increment: u64,
    pub max_value: u64,
    /// Rounded to three decimals
    pub usage_pct: f64,
    pub severity: Severity,
}

/// `int(11) unsigned` -> `int unsigned`
pub fn normalize_column_type(column_type: &str) -> String {
    let lowered = column_type.to_ascii_lowercase();
    let stripped = DISPLAY_WIDTH.replace_all(&lowered, "");
    SPACES.replace_all(stripped.trim(), " ").into_owned()
}

/// Largest value an integer column type can hold.
pub fn max_value_for_type(column_type: &str) -> Option<u64> {
    let max = match normalize_column_type(column_type).as_str() {
        "tinyint" => i8::MAX as u64,
        "tinyint unsigned" => u8::MAX as u64,
        "smallint" => i16::MAX as u64,
        "smallint unsigned" => u16::MAX as u64,
        "mediumint" => 8_388_607,
        "mediumint unsigned" => 16_777_215,
        "int" | "integer" => i32::MAX as u64,
        "int unsigned" | "integer unsigned" => u32::MAX as u64,
        "bigint" => i64::MAX as u64,
        "bigint unsigned" => u64::MAX,
        _ => return None,
    };
    Some(max)
}

/// Usage of every integer auto-increment column at or above `min_usage_pct`,
/// highest usage first. Non-integer columns are skipped.
pub fn pk_exhaustion_report(columns: &[AutoIncrementColumn], min_usage_pct: f64) -> Vec<PkUsage> {
    let mut report: Vec<PkUsage> = columns
        .iter()
        .filter_map(|c| {
            let max_value = max_value_for_type(&c.column_type)?;
            let usage = c.auto_increment as f64 / max_value as f64 * 100.0;
            (usage >= min_usage_pct).then(|| PkUsage {
                table: c.table.clone(),
                column: c.column.clone(),
                auto_increment: c.auto_increment,
                max_value,
                usage_pct: (usage * 1000.0).round() / 1000.0,
                severity: Severity::classify(usage),
            })
        })
        .collect();

    report.sort_by(|a, b| {
        b.usage_pct
            .total_cmp(&a.usage_pct)
            .then_with(|| a.table.cmp(&b.table))
    });
    report
}
