//! Improvement metrics deciding whether a created index stays.

/// Rows examined by the contributing statements, summed over those that
/// could be explained both before and after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub baseline_rows: u64,
    pub after_rows: u64,
}

pub trait ImprovementPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Relative improvement in percent, `None` when it cannot be computed.
    /// Regressions are negative.
    fn improvement_pct(&self, measurement: &Measurement) -> Option<f64>;
}

/// An index stays only when its improvement exceeds the configured minimum.
pub fn exceeds_threshold(improvement_pct: Option<f64>, min_improvement_pct: f64) -> bool {
    improvement_pct.is_some_and(|pct| pct > min_improvement_pct)
}

/// Default policy: relative reduction of rows examined.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowsExaminedPolicy;

impl ImprovementPolicy for RowsExaminedPolicy {
    fn name(&self) -> &'static str {
        "rows_examined"
    }

    fn improvement_pct(&self, m: &Measurement) -> Option<f64> {
        if m.baseline_rows == 0 {
            return None;
        }
        let baseline = m.baseline_rows as f64;
        Some((baseline - m.after_rows as f64) / baseline * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_examined_policy() {
        let policy = RowsExaminedPolicy;
        let pct = |baseline_rows, after_rows| {
            policy.improvement_pct(&Measurement {
                baseline_rows,
                after_rows,
            })
        };
        assert_eq!(pct(100_000, 1_000), Some(99.0));
        assert_eq!(pct(100, 100), Some(0.0));
        assert_eq!(pct(100, 150), Some(-50.0));
        assert_eq!(pct(0, 10), None);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert!(exceeds_threshold(Some(10.5), 10.0));
        assert!(!exceeds_threshold(Some(10.0), 10.0));
        assert!(!exceeds_threshold(Some(-3.0), 0.0));
        assert!(!exceeds_threshold(None, 0.0));
    }
}
