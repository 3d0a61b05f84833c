//! Index candidate generation and ranking.
//!
//! Every conjunctive group of a seed becomes one ordered column list:
//! equality columns, then range columns, then sort keys, ties broken by
//! aggregate weight and then by name. Identical lists merge, prefixes fold
//! into the longer list, and lists the live catalog already serves are
//! dropped. The result only depends on the seeds and the catalog snapshot.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use crate::analyzer::QueryAnalysis;
use crate::catalog::CatalogSnapshot;
use crate::config::CandidateConfig;
use crate::sql::{QueryFingerprint, UsageRole};

/// A statement that motivated a candidate and will be re-explained to
/// measure it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateReason {
    pub fingerprint: QueryFingerprint,
    pub sample: String,
    pub occurrence: u64,
    /// Rows examined on the candidate's table before the index existed
    pub baseline_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCandidate {
    pub table: String,
    pub columns: Vec<String>,
    /// Summed occurrence of the distinct contributing statements
    pub weight: u64,
    pub reasons: Vec<CandidateReason>,
}

impl IndexCandidate {
    fn absorb(&mut self, reasons: &[CandidateReason]) {
        for reason in reasons {
            if self
                .reasons
                .iter()
                .all(|r| r.fingerprint != reason.fingerprint)
            {
                self.weight += reason.occurrence;
                self.reasons.push(reason.clone());
            }
        }
        self.reasons.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
    }
}

/// Ranked candidates, grouped by table in name order.
pub fn generate<'a>(
    seeds: impl IntoIterator<Item = &'a QueryAnalysis>,
    catalog: &CatalogSnapshot,
    config: &CandidateConfig,
) -> Vec<IndexCandidate> {
    let seeds: Vec<&QueryAnalysis> = seeds.into_iter().filter(|s| s.is_seed()).collect();

    // (table, column) -> weight summed over distinct statements
    let mut aggregate: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    let mut counted: BTreeSet<(&str, &str, &QueryFingerprint)> = BTreeSet::new();
    for seed in &seeds {
        for usage in &seed.usages {
            let key = (usage.table.as_str(), usage.column.as_str());
            if counted.insert((key.0, key.1, &usage.fingerprint)) {
                *aggregate.entry(key).or_default() += usage.weight;
            }
        }
    }

    let mut merged: BTreeMap<(String, Vec<String>), IndexCandidate> = BTreeMap::new();
    for seed in &seeds {
        let mut groups: BTreeMap<(&str, u16), Vec<(&str, UsageRole)>> = BTreeMap::new();
        for usage in &seed.usages {
            groups
                .entry((usage.table.as_str(), usage.group))
                .or_default()
                .push((usage.column.as_str(), usage.role));
        }

        for ((table, _), mut columns) in groups {
            columns.sort_by_key(|(column, role)| {
                (
                    *role,
                    Reverse(aggregate.get(&(table, *column)).copied().unwrap_or(0)),
                    *column,
                )
            });
            let mut columns: Vec<String> = columns.iter().map(|(c, _)| c.to_string()).collect();
            columns.dedup();
            columns.truncate(config.max_columns);

            let reason = CandidateReason {
                fingerprint: seed.fingerprint.clone(),
                sample: seed.sample.clone(),
                occurrence: seed.occurrence,
                baseline_rows: seed.baseline_rows.get(table).copied().unwrap_or(0),
            };
            merged
                .entry((table.to_string(), columns.clone()))
                .or_insert_with(|| IndexCandidate {
                    table: table.to_string(),
                    columns,
                    weight: 0,
                    reasons: Vec::new(),
                })
                .absorb(&[reason]);
        }
    }

    let mut by_table: BTreeMap<String, Vec<IndexCandidate>> = BTreeMap::new();
    for ((table, _), candidate) in merged {
        by_table.entry(table).or_default().push(candidate);
    }

    let mut ranked = Vec::new();
    for (table, candidates) in by_table {
        let mut kept: Vec<IndexCandidate> = fold_prefixes(candidates)
            .into_iter()
            .filter(|c| {
                let covered = catalog.covers(&table, &c.columns);
                if covered {
                    tracing::debug!(table = %table, columns = ?c.columns, "already served by an existing index");
                }
                !covered
            })
            .collect();

        kept.sort_by(|a, b| {
            b.weight
                .cmp(&a.weight)
                .then_with(|| a.columns.cmp(&b.columns))
        });
        kept.truncate(config.max_per_table);
        ranked.extend(kept);
    }

    tracing::debug!(candidates = ranked.len(), "candidates generated");
    ranked
}

/// Reasons for an index that exists without a lifecycle record, rebuilt
/// from stored analyses that use its leading column and had a baseline on
/// its table.
pub fn reasons_for(analyses: &[QueryAnalysis], table: &str, columns: &[String]) -> Vec<CandidateReason> {
    let Some(leading) = columns.first() else {
        return Vec::new();
    };
    let mut reasons: Vec<CandidateReason> = analyses
        .iter()
        .filter(|a| a.usages.iter().any(|u| u.table == table && &u.column == leading))
        .filter_map(|a| {
            let baseline_rows = a.baseline_rows.get(table).copied().filter(|rows| *rows > 0)?;
            Some(CandidateReason {
                fingerprint: a.fingerprint.clone(),
                sample: a.sample.clone(),
                occurrence: a.occurrence,
                baseline_rows,
            })
        })
        .collect();
    reasons.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
    reasons
}

/// Fold every candidate that is a strict prefix of another into the longest
/// such candidate (heaviest, then lowest columns, on ties).
fn fold_prefixes(mut candidates: Vec<IndexCandidate>) -> Vec<IndexCandidate> {
    candidates.sort_by(|a, b| {
        a.columns
            .len()
            .cmp(&b.columns.len())
            .then_with(|| a.columns.cmp(&b.columns))
    });

    let mut out: Vec<IndexCandidate> = Vec::new();
    while !candidates.is_empty() {
        let short = candidates.remove(0);
        let target = candidates
            .iter_mut()
            .filter(|long| long.columns.len() > short.columns.len() && long.columns.starts_with(&short.columns))
            .max_by(|a, b| {
                a.columns
                    .len()
                    .cmp(&b.columns.len())
                    .then_with(|| a.weight.cmp(&b.weight))
                    .then_with(|| b.columns.cmp(&a.columns))
            });
        match target {
            Some(long) => long.absorb(&short.reasons),
            None => out.push(short),
        }
    }
    out
}
