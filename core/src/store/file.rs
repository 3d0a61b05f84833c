//! JSON-file store.
//!
//! The whole state is rewritten on each mutation. A mutation is applied to a
//! copy and only becomes visible once the file write succeeded, so a failed
//! write can be retried without double counting. Each write goes to a temp
//! file in the same directory which is then renamed over the store, so a
//! crash mid-write leaves the previous contents in place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use super::{MetadataStore, StoreError, StoreResult, StoreState};
use crate::analyzer::QueryAnalysis;
use crate::backtest::ManagedIndex;
use crate::capture::{RecordBatch, RecordSummary, RecordedQuery, TableActivity};
use crate::sql::QueryFingerprint;

pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Open the store at `path`; a missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = Self::load(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> StoreResult<StoreState> {
        match File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                file.read_to_string(&mut contents)?;
                if contents.trim().is_empty() {
                    return Ok(StoreState::default());
                }
                serde_json::from_str(&contents).map_err(|e| {
                    StoreError::Serialization(format!("Failed to parse {}: {e}", path.display()))
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &StoreState) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &json))
            .await
            .map_err(|e| StoreError::Io(format!("store writer stopped: {e}")))?
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> StoreResult<T> {
        Ok(f(&*self.state.lock().await))
    }

    async fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut StoreState) -> T + Send,
        T: Send,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = f(&mut next);
        self.save(&next).await?;
        *state = next;
        Ok(out)
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::from(e.error))?;
    Ok(())
}

#[async_trait]
impl MetadataStore for JsonFileStore {
    async fn apply_batch(&self, batch: &RecordBatch) -> StoreResult<bool> {
        self.write(|s| s.apply_batch(batch)).await
    }

    async fn query_records(&self) -> StoreResult<Vec<RecordedQuery>> {
        self.read(StoreState::query_records).await
    }

    async fn remove_queries(&self, fingerprints: &[QueryFingerprint]) -> StoreResult<usize> {
        self.write(|s| s.remove_queries(fingerprints)).await
    }

    async fn upsert_analysis(&self, analysis: &QueryAnalysis) -> StoreResult<()> {
        self.write(|s| s.upsert_analysis(analysis)).await
    }

    async fn analyses(&self) -> StoreResult<Vec<QueryAnalysis>> {
        self.read(StoreState::analyses).await
    }

    async fn remove_analyses(&self, fingerprints: &[QueryFingerprint]) -> StoreResult<usize> {
        self.write(|s| s.remove_analyses(fingerprints)).await
    }

    async fn upsert_managed_index(&self, index: &ManagedIndex) -> StoreResult<()> {
        self.write(|s| s.upsert_managed_index(index)).await
    }

    async fn managed_index(&self, name: &str) -> StoreResult<Option<ManagedIndex>> {
        self.read(|s| s.managed_index(name)).await
    }

    async fn managed_indexes(&self) -> StoreResult<Vec<ManagedIndex>> {
        self.read(StoreState::managed_indexes).await
    }

    async fn table_activity(&self) -> StoreResult<BTreeMap<String, TableActivity>> {
        self.read(StoreState::table_activity).await
    }

    async fn remove_tables(&self, tables: &[String]) -> StoreResult<usize> {
        self.write(|s| s.remove_tables(tables)).await
    }

    async fn summaries(&self) -> StoreResult<Vec<RecordSummary>> {
        self.read(StoreState::summaries).await
    }

    async fn prune_history(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        self.write(|s| s.prune_history(before)).await
    }
}
