//! Notebook corpus: the chunks evaluation datasets are generated from.
//!
//! The engine only needs two things from the document side of the system:
//! whether a notebook exists, and the chunks of its fully ingested
//! documents. [`ChunkSource`] is that seam. [`Corpus`] is a JSON-file
//! implementation used by the CLI and in tests.

use crate::error::{EvalError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A contiguous span of a source document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    #[serde(default)]
    pub document_id: String,
    pub text: String,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document_id: String::new(),
            text: text.into(),
        }
    }
}

/// Read access to notebook chunks.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn notebook_exists(&self, notebook_id: &str) -> Result<bool>;

    /// Chunks of every completed document in the notebook.
    async fn list_chunks(&self, notebook_id: &str) -> Result<Vec<Chunk>>;
}

/// Ingestion status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A document and its chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub status: DocumentStatus,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

/// A notebook grouping documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub documents: Vec<CorpusDocument>,
}

/// Every notebook known to this process.
///
/// Expected format:
/// ```json
/// {
///   "notebooks": [
///     {
///       "id": "nb1",
///       "documents": [
///         {"id": "doc1", "status": "completed",
///          "chunks": [{"id": "c1", "text": "..."}]}
///       ]
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    pub notebooks: Vec<Notebook>,
}

impl Corpus {
    /// Load from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let mut corpus: Corpus = serde_json::from_str(&content)
            .map_err(|e| EvalError::Serialization(format!("corpus {:?}: {}", path, e)))?;
        corpus.link_chunks();
        Ok(corpus)
    }

    /// Fill in `document_id` on chunks that omit it.
    fn link_chunks(&mut self) {
        for notebook in &mut self.notebooks {
            for doc in &mut notebook.documents {
                for chunk in &mut doc.chunks {
                    if chunk.document_id.is_empty() {
                        chunk.document_id = doc.id.clone();
                    }
                }
            }
        }
    }

    pub fn notebook(&self, notebook_id: &str) -> Option<&Notebook> {
        self.notebooks.iter().find(|n| n.id == notebook_id)
    }

    /// Chunks of completed documents, in document order.
    pub fn completed_chunks(&self, notebook_id: &str) -> Vec<&Chunk> {
        self.notebook(notebook_id)
            .map(|n| {
                n.documents
                    .iter()
                    .filter(|d| d.status == DocumentStatus::Completed)
                    .flat_map(|d| d.chunks.iter())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChunkSource for Corpus {
    async fn notebook_exists(&self, notebook_id: &str) -> Result<bool> {
        Ok(self.notebook(notebook_id).is_some())
    }

    async fn list_chunks(&self, notebook_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .completed_chunks(notebook_id)
            .into_iter()
            .cloned()
            .collect())
    }
}
