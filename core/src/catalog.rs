//! Live index catalog view.
//!
//! A snapshot is rebuilt from catalog introspection at the start of each run
//! and never cached across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::{IndexColumn, IndexReads, ManagedName};

pub const PRIMARY_KEY: &str = "PRIMARY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl TableIndex {
    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY_KEY
    }

    pub fn is_managed(&self) -> bool {
        ManagedName::is_managed(&self.name)
    }

    /// Indexes that enforce something and are never suggested for removal.
    fn is_constraint(&self) -> bool {
        self.is_primary() || self.unique
    }
}

/// Indexes per table, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    tables: BTreeMap<String, Vec<TableIndex>>,
}

impl CatalogSnapshot {
    /// Group per-column catalog rows into ordered column lists.
    pub fn from_rows(rows: &[IndexColumn]) -> Self {
        let mut tables: BTreeMap<String, Vec<TableIndex>> = BTreeMap::new();
        let mut sequenced: BTreeMap<(String, String), Vec<(u32, String)>> = BTreeMap::new();

        for row in rows {
            let indexes = tables.entry(row.table.clone()).or_default();
            if !indexes.iter().any(|i| i.name == row.key_name) {
                indexes.push(TableIndex {
                    name: row.key_name.clone(),
                    columns: Vec::new(),
                    unique: !row.non_unique,
                });
            }
            sequenced
                .entry((row.table.clone(), row.key_name.clone()))
                .or_default()
                .push((row.seq_in_index, row.column.clone()));
        }

        for ((table, key_name), mut columns) in sequenced {
            columns.sort_by_key(|(seq, _)| *seq);
            if let Some(index) = tables
                .get_mut(&table)
                .and_then(|idx| idx.iter_mut().find(|i| i.name == key_name))
            {
                index.columns = columns.into_iter().map(|(_, c)| c).collect();
            }
        }

        Self { tables }
    }

    pub fn indexes(&self, table: &str) -> &[TableIndex] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &Vec<TableIndex>)> {
        self.tables.iter()
    }

    pub fn contains(&self, table: &str, name: &str) -> bool {
        self.indexes(table).iter().any(|i| i.name == name)
    }

    pub fn get(&self, table: &str, name: &str) -> Option<&TableIndex> {
        self.indexes(table).iter().find(|i| i.name == name)
    }

    /// An index with exactly these columns.
    pub fn find_exact(&self, table: &str, columns: &[String]) -> Option<&TableIndex> {
        self.indexes(table).iter().find(|i| i.columns == columns)
    }

    /// Whether `columns` is a left prefix of (or equal to) an existing index.
    pub fn covers(&self, table: &str, columns: &[String]) -> bool {
        self.indexes(table)
            .iter()
            .any(|i| i.columns.starts_with(columns))
    }

    /// Indexes carrying the managed name tag, as (table, index).
    pub fn managed(&self) -> Vec<(&str, &TableIndex)> {
        self.tables
            .iter()
            .flat_map(|(table, indexes)| {
                indexes
                    .iter()
                    .filter(|i| i.is_managed())
                    .map(move |i| (table.as_str(), i))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Same ordered columns as another index
    Duplicate,
    /// Left prefix of a longer index
    Redundant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFinding {
    pub table: String,
    pub kind: FindingKind,
    /// The index that could be removed
    pub redundant: String,
    pub superseded_by: String,
    pub columns: Vec<String>,
}

/// Exact duplicates. The earlier index in catalog order is kept unless the
/// later one enforces a constraint.
pub fn find_duplicate_indexes(table: &str, indexes: &[TableIndex]) -> Vec<IndexFinding> {
    let mut findings = Vec::new();
    for (i, later) in indexes.iter().enumerate() {
        let Some(earlier) = indexes[..i].iter().find(|e| e.columns == later.columns) else {
            continue;
        };
        let (redundant, keeper) = if later.is_constraint() && !earlier.is_constraint() {
            (earlier, later)
        } else {
            (later, earlier)
        };
        if redundant.is_constraint() {
            continue;
        }
        findings.push(IndexFinding {
            table: table.to_string(),
            kind: FindingKind::Duplicate,
            redundant: redundant.name.clone(),
            superseded_by: keeper.name.clone(),
            columns: redundant.columns.clone(),
        });
    }
    findings
}

/// Indexes whose columns are a strict left prefix of a longer index.
pub fn find_redundant_indexes(table: &str, indexes: &[TableIndex]) -> Vec<IndexFinding> {
    let mut findings = Vec::new();
    for short in indexes.iter().filter(|i| !i.is_constraint()) {
        let longest = indexes
            .iter()
            .filter(|long| {
                long.columns.len() > short.columns.len() && long.columns.starts_with(&short.columns)
            })
            .max_by_key(|long| long.columns.len());
        if let Some(long) = longest {
            findings.push(IndexFinding {
                table: table.to_string(),
                kind: FindingKind::Redundant,
                redundant: short.name.clone(),
                superseded_by: long.name.clone(),
                columns: short.columns.clone(),
            });
        }
    }
    findings
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub duplicates: Vec<IndexFinding>,
    pub redundant: Vec<IndexFinding>,
}

impl IndexReport {
    pub fn is_empty(&self) -> bool {
        self.duplicates.is_empty() && self.redundant.is_empty()
    }
}

/// Duplicate and redundant indexes across the snapshot, optionally for one
/// table.
pub fn analyze_indexes(snapshot: &CatalogSnapshot, table: Option<&str>) -> IndexReport {
    let mut report = IndexReport::default();
    for (name, indexes) in snapshot.tables() {
        if table.is_some_and(|t| t != name) {
            continue;
        }
        report.duplicates.extend(find_duplicate_indexes(name, indexes));
        report.redundant.extend(find_redundant_indexes(name, indexes));
    }
    report
}

/// A secondary index the server has not read through since its counters
/// were last reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusedIndex {
    pub table: String,
    pub index: String,
    pub columns: Vec<String>,
}

/// Non-unique secondary indexes with no recorded reads. Indexes missing from
/// `reads` count as unread.
pub fn find_unused_indexes(
    snapshot: &CatalogSnapshot,
    reads: &[IndexReads],
    table: Option<&str>,
) -> Vec<UnusedIndex> {
    let read: BTreeMap<(&str, &str), u64> = reads
        .iter()
        .map(|r| ((r.table.as_str(), r.index.as_str()), r.rows_read))
        .collect();

    snapshot
        .tables()
        .filter(|(name, _)| table.is_none_or(|t| t == name.as_str()))
        .flat_map(|(name, indexes)| {
            indexes
                .iter()
                .filter(|i| !i.is_constraint())
                .filter(|i| read.get(&(name.as_str(), i.name.as_str())).copied().unwrap_or(0) == 0)
                .map(move |i| UnusedIndex {
                    table: name.clone(),
                    index: i.name.clone(),
                    columns: i.columns.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn idx(name: &str, columns: &[&str]) -> TableIndex {
        TableIndex {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: name == PRIMARY_KEY,
        }
    }

    fn row(table: &str, key: &str, seq: u32, column: &str) -> IndexColumn {
        IndexColumn {
            table: table.into(),
            key_name: key.into(),
            seq_in_index: seq,
            column: column.into(),
            non_unique: key != PRIMARY_KEY,
        }
    }

    #[test]
    fn test_rows_reduce_to_ordered_lists() {
        let snapshot = CatalogSnapshot::from_rows(&[
            row("t", "idx_a", 2, "col2"),
            row("t", "idx_a", 1, "col1"),
            row("t", "idx_b", 1, "col3"),
            row("u", "PRIMARY", 1, "id"),
        ]);
        assert_eq!(
            snapshot.indexes("t"),
            &[idx("idx_a", &["col1", "col2"]), idx("idx_b", &["col3"])]
        );
        assert!(snapshot.indexes("u")[0].unique);
        assert!(snapshot.indexes("missing").is_empty());
    }

    #[test]
    fn test_covers_is_prefix() {
        let snapshot = CatalogSnapshot::from_rows(&[
            row("t", "idx_ab", 1, "a"),
            row("t", "idx_ab", 2, "b"),
        ]);
        let cols = |c: &[&str]| c.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(snapshot.covers("t", &cols(&["a"])));
        assert!(snapshot.covers("t", &cols(&["a", "b"])));
        assert!(!snapshot.covers("t", &cols(&["b"])));
        assert!(!snapshot.covers("t", &cols(&["a", "b", "c"])));
    }

    #[test]
    fn test_exact_duplicates() {
        let found = find_duplicate_indexes(
            "t",
            &[idx("idx_a", &["name", "owner"]), idx("idx_b", &["name", "owner"])],
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].redundant, "idx_b");
        assert_eq!(found[0].superseded_by, "idx_a");

        assert!(find_duplicate_indexes("t", &[idx("idx_a", &["name"]), idx("idx_b", &["owner"])]).is_empty());
    }

    #[test]
    fn test_primary_key_is_never_dropped() {
        let found = find_duplicate_indexes("t", &[idx("idx_a", &["name"]), idx(PRIMARY_KEY, &["name"])]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].redundant, "idx_a");
        assert_eq!(found[0].superseded_by, PRIMARY_KEY);

        let found = find_redundant_indexes(
            "t",
            &[idx(PRIMARY_KEY, &["name"]), idx("idx_name_owner", &["name", "owner"])],
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_left_prefix_redundancy() {
        let found = find_redundant_indexes(
            "t",
            &[idx("idx_abc", &["a", "b", "c"]), idx("idx_a", &["a"]), idx("idx_ab", &["a", "b"])],
        );
        let names: Vec<_> = found.iter().map(|f| f.redundant.as_str()).collect();
        assert_eq!(names, vec!["idx_a", "idx_ab"]);
        assert!(found.iter().all(|f| f.superseded_by == "idx_abc"));

        assert!(find_redundant_indexes("t", &[idx("idx_abc", &["a", "b", "c"]), idx("idx_bc", &["b", "c"])]).is_empty());
        assert!(find_redundant_indexes("t", &[idx("idx_ab", &["a", "b"]), idx("idx_ba", &["b", "a"])]).is_empty());
    }

    #[test]
    fn test_analyze_indexes() {
        let snapshot = CatalogSnapshot::from_rows(&[
            row("t", "idx_abc", 1, "a"),
            row("t", "idx_abc", 2, "b"),
            row("t", "idx_abc", 3, "c"),
            row("t", "idx_ab", 1, "a"),
            row("t", "idx_ab", 2, "b"),
            row("t", "idx_xy", 1, "x"),
            row("t", "idx_xy", 2, "y"),
            row("t", "idx_xy2", 1, "x"),
            row("t", "idx_xy2", 2, "y"),
        ]);
        let report = analyze_indexes(&snapshot, None);
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.redundant.len(), 1);
        assert!(analyze_indexes(&CatalogSnapshot::default(), None).is_empty());
        assert!(analyze_indexes(&snapshot, Some("other")).is_empty());
    }

    #[test]
    fn test_managed_listing() {
        let snapshot = CatalogSnapshot::from_rows(&[
            row("t", "autoidx_a", 1, "a"),
            row("t", "idx_b", 1, "b"),
        ]);
        let managed = snapshot.managed();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].0, "t");
        assert_eq!(managed[0].1.name, "autoidx_a");
    }

    #[test]
    fn test_unused_indexes() {
        let snapshot = CatalogSnapshot::from_rows(&[
            row("t", PRIMARY_KEY, 1, "id"),
            row("t", "idx_read", 1, "a"),
            row("t", "idx_zero", 1, "b"),
            row("t", "idx_never", 1, "c"),
            row("t", "idx_never", 2, "d"),
            row("u", "idx_other", 1, "x"),
        ]);
        let reads = vec![
            IndexReads { table: "t".into(), index: "idx_read".into(), rows_read: 412 },
            IndexReads { table: "t".into(), index: "idx_zero".into(), rows_read: 0 },
            IndexReads { table: "u".into(), index: "idx_read".into(), rows_read: 9 },
        ];

        let unused = find_unused_indexes(&snapshot, &reads, Some("t"));
        assert_eq!(
            unused,
            vec![
                UnusedIndex { table: "t".into(), index: "idx_zero".into(), columns: vec!["b".into()] },
                UnusedIndex {
                    table: "t".into(),
                    index: "idx_never".into(),
                    columns: vec!["c".into(), "d".into()],
                },
            ]
        );

        let all: Vec<_> = find_unused_indexes(&snapshot, &reads, None).into_iter().map(|u| u.index).collect();
        assert_eq!(all, vec!["idx_zero", "idx_never", "idx_other"]);
    }
}
