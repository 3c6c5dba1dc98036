//! Persistence of datasets and runs.
//!
//! Writes are whole-entity and versioned: `insert_*` stores version 1, and
//! `replace_*` only accepts a snapshot whose version is exactly one past the
//! stored one. A lost race surfaces as `StateConflict` instead of silently
//! overwriting a newer state.
//!
//! [`FileStore`] keeps one file per entity in either JSON (human-readable)
//! or bincode (compact binary). [`MemoryStore`] is the in-process variant.

use crate::error::{EvalError, Result};
use crate::eval::model::{EvaluationDataset, EvaluationRun};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use walkdir::WalkDir;

/// Storage of evaluation entities.
#[async_trait]
pub trait EvalRepository: Send + Sync {
    async fn insert_dataset(&self, dataset: &EvaluationDataset) -> Result<()>;

    /// Store `dataset` if the stored copy is its immediate predecessor.
    async fn replace_dataset(&self, dataset: &EvaluationDataset) -> Result<()>;

    async fn find_dataset(&self, id: &str) -> Result<Option<EvaluationDataset>>;

    /// Datasets of a notebook, newest first.
    async fn list_datasets(&self, notebook_id: &str) -> Result<Vec<EvaluationDataset>>;

    async fn insert_run(&self, run: &EvaluationRun) -> Result<()>;

    /// Store `run` if the stored copy is its immediate predecessor.
    async fn replace_run(&self, run: &EvaluationRun) -> Result<()>;

    async fn find_run(&self, id: &str) -> Result<Option<EvaluationRun>>;

    /// Runs of a dataset, newest first.
    async fn list_runs(&self, dataset_id: &str) -> Result<Vec<EvaluationRun>>;

    /// Every dataset, used for start-up recovery.
    async fn all_datasets(&self) -> Result<Vec<EvaluationDataset>>;

    /// Every run, used for start-up recovery.
    async fn all_runs(&self) -> Result<Vec<EvaluationRun>>;

    /// Look up several runs at once, in `ids` order. Missing ids map to `None`.
    async fn find_runs(&self, ids: &[String]) -> Result<Vec<Option<EvaluationRun>>> {
        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            runs.push(self.find_run(id).await?);
        }
        Ok(runs)
    }
}

fn check_insert(entity: &str, id: &str, exists: bool, version: u64) -> Result<()> {
    if exists {
        return Err(EvalError::StateConflict(format!(
            "{} {} already exists",
            entity, id
        )));
    }
    if version != 1 {
        return Err(EvalError::StateConflict(format!(
            "new {} {} must start at version 1, got {}",
            entity, id, version
        )));
    }
    Ok(())
}

fn check_replace(entity: &'static str, id: &str, stored: Option<u64>, version: u64) -> Result<()> {
    match stored {
        None => Err(EvalError::not_found(entity, id)),
        Some(current) if current + 1 == version => Ok(()),
        Some(current) => Err(EvalError::StateConflict(format!(
            "{} {} was modified concurrently (stored version {}, write version {})",
            entity, id, current, version
        ))),
    }
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) {
    items.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
}

/// In-memory repository.
#[derive(Default)]
pub struct MemoryStore {
    datasets: RwLock<HashMap<String, EvaluationDataset>>,
    runs: RwLock<HashMap<String, EvaluationRun>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvalRepository for MemoryStore {
    async fn insert_dataset(&self, dataset: &EvaluationDataset) -> Result<()> {
        let mut datasets = self.datasets.write().await;
        check_insert(
            "Dataset",
            &dataset.id,
            datasets.contains_key(&dataset.id),
            dataset.version,
        )?;
        datasets.insert(dataset.id.clone(), dataset.clone());
        Ok(())
    }

    async fn replace_dataset(&self, dataset: &EvaluationDataset) -> Result<()> {
        let mut datasets = self.datasets.write().await;
        let stored = datasets.get(&dataset.id).map(|d| d.version);
        check_replace("Dataset", &dataset.id, stored, dataset.version)?;
        datasets.insert(dataset.id.clone(), dataset.clone());
        Ok(())
    }

    async fn find_dataset(&self, id: &str) -> Result<Option<EvaluationDataset>> {
        Ok(self.datasets.read().await.get(id).cloned())
    }

    async fn list_datasets(&self, notebook_id: &str) -> Result<Vec<EvaluationDataset>> {
        let mut found: Vec<_> = self
            .datasets
            .read()
            .await
            .values()
            .filter(|d| d.notebook_id == notebook_id)
            .cloned()
            .collect();
        newest_first(&mut found, |d| d.created_at);
        Ok(found)
    }

    async fn insert_run(&self, run: &EvaluationRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        check_insert("Run", &run.id, runs.contains_key(&run.id), run.version)?;
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn replace_run(&self, run: &EvaluationRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        let stored = runs.get(&run.id).map(|r| r.version);
        check_replace("Run", &run.id, stored, run.version)?;
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn find_run(&self, id: &str) -> Result<Option<EvaluationRun>> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn list_runs(&self, dataset_id: &str) -> Result<Vec<EvaluationRun>> {
        let mut found: Vec<_> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.dataset_id == dataset_id)
            .cloned()
            .collect();
        newest_first(&mut found, |r| r.created_at);
        Ok(found)
    }

    async fn all_datasets(&self) -> Result<Vec<EvaluationDataset>> {
        Ok(self.datasets.read().await.values().cloned().collect())
    }

    async fn all_runs(&self) -> Result<Vec<EvaluationRun>> {
        Ok(self.runs.read().await.values().cloned().collect())
    }
}

/// On-disk encoding of entity files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveFormat {
    /// JSON format (human-readable, larger).
    #[default]
    Json,
    /// Bincode format (binary, compact).
    Bincode,
}

impl SaveFormat {
    /// Determine format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(SaveFormat::Json),
            Some("bin") | Some("bincode") => Some(SaveFormat::Bincode),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Json => "json",
            SaveFormat::Bincode => "bin",
        }
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            SaveFormat::Json => Ok(serde_json::to_string_pretty(value)
                .map_err(|e| EvalError::Serialization(e.to_string()))?
                .into_bytes()),
            SaveFormat::Bincode => {
                bincode::serde::encode_to_vec(value, bincode::config::standard())
                    .map_err(|e| EvalError::Serialization(e.to_string()))
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            SaveFormat::Json => {
                serde_json::from_slice(data).map_err(|e| EvalError::Serialization(e.to_string()))
            }
            SaveFormat::Bincode => {
                let (value, _): (T, usize) =
                    bincode::serde::decode_from_slice(data, bincode::config::standard())
                        .map_err(|e| EvalError::Serialization(e.to_string()))?;
                Ok(value)
            }
        }
    }
}

/// File-per-entity repository rooted at a data directory.
///
/// Layout: `<root>/datasets/<id>.<ext>` and `<root>/runs/<id>.<ext>`.
/// Files are written to a temporary sibling and renamed into place, and a
/// process-wide lock serialises the read-check-write of `replace_*`.
pub struct FileStore {
    root: PathBuf,
    format: SaveFormat,
    write_lock: tokio::sync::Mutex<()>,
}

const DATASETS_DIR: &str = "datasets";
const RUNS_DIR: &str = "runs";

impl FileStore {
    /// Open (creating if needed) a store at `root`.
    pub fn open(root: impl Into<PathBuf>, format: SaveFormat) -> Result<Self> {
        let root = root.into();
        for dir in [DATASETS_DIR, RUNS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| EvalError::io(&path, e))?;
        }
        Ok(Self {
            root,
            format,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entity_path(&self, dir: &str, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(EvalError::Validation(format!("invalid id: {:?}", id)));
        }
        Ok(self
            .root
            .join(dir)
            .join(format!("{}.{}", id, self.format.extension())))
    }

    fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let data = self.format.encode(value)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data).map_err(|e| EvalError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| EvalError::io(path, e))?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.is_file() {
            return Ok(None);
        }
        let data = fs::read(path).map_err(|e| EvalError::io(path, e))?;
        let format = SaveFormat::from_path(path).unwrap_or(self.format);
        format.decode(&data).map(Some)
    }

    fn find<T: DeserializeOwned>(&self, dir: &str, id: &str) -> Result<Option<T>> {
        match self.entity_path(dir, id) {
            Ok(path) => self.read(&path),
            // An id that could never have been written is simply absent.
            Err(EvalError::Validation(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn load_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for entry in WalkDir::new(self.root.join(dir))
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if SaveFormat::from_path(path).is_none() {
                continue;
            }
            if let Some(item) = self.read(path)? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl EvalRepository for FileStore {
    async fn insert_dataset(&self, dataset: &EvaluationDataset) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.entity_path(DATASETS_DIR, &dataset.id)?;
        check_insert("Dataset", &dataset.id, path.exists(), dataset.version)?;
        self.write(&path, dataset)
    }

    async fn replace_dataset(&self, dataset: &EvaluationDataset) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.entity_path(DATASETS_DIR, &dataset.id)?;
        let stored: Option<EvaluationDataset> = self.read(&path)?;
        check_replace(
            "Dataset",
            &dataset.id,
            stored.map(|d| d.version),
            dataset.version,
        )?;
        self.write(&path, dataset)
    }

    async fn find_dataset(&self, id: &str) -> Result<Option<EvaluationDataset>> {
        self.find(DATASETS_DIR, id)
    }

    async fn list_datasets(&self, notebook_id: &str) -> Result<Vec<EvaluationDataset>> {
        let mut found: Vec<EvaluationDataset> = self
            .load_all::<EvaluationDataset>(DATASETS_DIR)?
            .into_iter()
            .filter(|d: &EvaluationDataset| d.notebook_id == notebook_id)
            .collect();
        newest_first(&mut found, |d| d.created_at);
        Ok(found)
    }

    async fn insert_run(&self, run: &EvaluationRun) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.entity_path(RUNS_DIR, &run.id)?;
        check_insert("Run", &run.id, path.exists(), run.version)?;
        self.write(&path, run)
    }

    async fn replace_run(&self, run: &EvaluationRun) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.entity_path(RUNS_DIR, &run.id)?;
        let stored: Option<EvaluationRun> = self.read(&path)?;
        check_replace("Run", &run.id, stored.map(|r| r.version), run.version)?;
        self.write(&path, run)
    }

    async fn find_run(&self, id: &str) -> Result<Option<EvaluationRun>> {
        self.find(RUNS_DIR, id)
    }

    async fn list_runs(&self, dataset_id: &str) -> Result<Vec<EvaluationRun>> {
        let mut found: Vec<EvaluationRun> = self
            .load_all::<EvaluationRun>(RUNS_DIR)?
            .into_iter()
            .filter(|r: &EvaluationRun| r.dataset_id == dataset_id)
            .collect();
        newest_first(&mut found, |r| r.created_at);
        Ok(found)
    }

    async fn all_datasets(&self) -> Result<Vec<EvaluationDataset>> {
        self.load_all(DATASETS_DIR)
    }

    async fn all_runs(&self) -> Result<Vec<EvaluationRun>> {
        self.load_all(RUNS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::model::{DatasetStatus, EvaluationType, TestCase};
    use tempfile::TempDir;

    fn completed_dataset() -> (EvaluationDataset, EvaluationDataset) {
        let created = EvaluationDataset::create("nb1", "baseline", 2, 10).unwrap();
        let generating = created.mark_generating().unwrap();
        let done = generating
            .mark_completed(vec![TestCase::from_chunk("What is Rust?", "c1", None)])
            .unwrap();
        (created, done)
    }

    async fn exercise_versioning(store: &dyn EvalRepository) {
        let created = EvaluationDataset::create("nb1", "ds", 2, 10).unwrap();
        store.insert_dataset(&created).await.unwrap();
        assert!(store.insert_dataset(&created).await.is_err());

        let generating = created.mark_generating().unwrap();
        store.replace_dataset(&generating).await.unwrap();

        // A second writer holding the old snapshot loses.
        let stale = created.mark_generating().unwrap();
        let err = store.replace_dataset(&stale).await.unwrap_err();
        assert!(matches!(err, EvalError::StateConflict(_)));

        let loaded = store.find_dataset(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DatasetStatus::Generating);
        assert_eq!(loaded.version, 2);
    }

    #[tokio::test]
    async fn test_memory_store_versioning() {
        exercise_versioning(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_file_store_versioning() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), SaveFormat::Json).unwrap();
        exercise_versioning(&store).await;
    }

    #[tokio::test]
    async fn test_replace_unknown_is_not_found() {
        let store = MemoryStore::new();
        let (_, done) = completed_dataset();
        let err = store.replace_dataset(&done).await.unwrap_err();
        assert!(matches!(err, EvalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_bincode_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), SaveFormat::Bincode).unwrap();
        let (created, done) = completed_dataset();
        store.insert_dataset(&created).await.unwrap();
        let generating = created.mark_generating().unwrap();
        store.replace_dataset(&generating).await.unwrap();
        store.replace_dataset(&done).await.unwrap();

        let loaded = store.find_dataset(&done.id).await.unwrap().unwrap();
        assert_eq!(loaded, done);
        assert!(dir.path().join("datasets").join(format!("{}.bin", done.id)).exists());
    }

    #[tokio::test]
    async fn test_json_is_readable() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), SaveFormat::Json).unwrap();
        let run = EvaluationRun::create("ds1", 5, EvaluationType::FullRag).unwrap();
        store.insert_run(&run).await.unwrap();

        let path = dir.path().join("runs").join(format!("{}.json", run.id));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"full_rag\""));
        assert!(content.contains("\"pending\""));
    }

    #[tokio::test]
    async fn test_list_filters_by_parent() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), SaveFormat::Json).unwrap();
        for notebook in ["nb1", "nb1", "nb2"] {
            let ds = EvaluationDataset::create(notebook, "ds", 1, 1).unwrap();
            store.insert_dataset(&ds).await.unwrap();
        }
        let listed = store.list_datasets("nb1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
        assert_eq!(store.all_datasets().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_find_runs_preserves_order_and_gaps() {
        let store = MemoryStore::new();
        let a = EvaluationRun::create("ds", 5, EvaluationType::RetrievalOnly).unwrap();
        let b = EvaluationRun::create("ds", 5, EvaluationType::RetrievalOnly).unwrap();
        store.insert_run(&a).await.unwrap();
        store.insert_run(&b).await.unwrap();

        let ids = vec![b.id.clone(), "missing".to_string(), a.id.clone()];
        let found = store.find_runs(&ids).await.unwrap();
        assert_eq!(found[0].as_ref().map(|r| r.id.as_str()), Some(b.id.as_str()));
        assert!(found[1].is_none());
        assert_eq!(found[2].as_ref().map(|r| r.id.as_str()), Some(a.id.as_str()));
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path(), SaveFormat::Json).unwrap();
        assert!(store.find_run("../etc/passwd").await.unwrap().is_none());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            SaveFormat::from_path(Path::new("x.json")),
            Some(SaveFormat::Json)
        );
        assert_eq!(
            SaveFormat::from_path(Path::new("x.bincode")),
            Some(SaveFormat::Bincode)
        );
        assert_eq!(SaveFormat::from_path(Path::new("x.tmp")), None);
    }
}
