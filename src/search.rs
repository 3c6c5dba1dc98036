//! Nearest-neighbour search seam.
//!
//! The evaluation engine treats the retrieval index as a black box behind
//! [`VectorSearch`]. [`KeywordSearcher`] ranks a [`Corpus`] by weighted term
//! overlap so datasets can be evaluated without an external index.

use crate::corpus::{Chunk, Corpus};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A chunk returned by search, with its ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Ranked retrieval over a notebook.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Up to `k` chunks for `query`, best first.
    async fn search(&self, query: &str, notebook_id: &str, k: usize)
    -> Result<Vec<RetrievedChunk>>;
}

/// Term-overlap ranking over the completed chunks of a corpus notebook.
///
/// Scores are the sum of `idf(term)` over query terms present in the chunk,
/// normalised by the query length. Chunks sharing no term are not returned.
pub struct KeywordSearcher {
    corpus: Arc<Corpus>,
}

impl KeywordSearcher {
    pub fn new(corpus: Arc<Corpus>) -> Self {
        Self { corpus }
    }

    fn rank(&self, query: &str, notebook_id: &str, k: usize) -> Vec<RetrievedChunk> {
        let chunks = self.corpus.completed_chunks(notebook_id);
        if chunks.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_terms: HashSet<String> = tokenize(query).collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let chunk_terms: Vec<HashSet<String>> =
            chunks.iter().map(|c| tokenize(&c.text).collect()).collect();

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for terms in &chunk_terms {
            for term in &query_terms {
                if terms.contains(term) {
                    *doc_freq.entry(term.as_str()).or_insert(0) += 1;
                }
            }
        }

        let n = chunks.len() as f32;
        let mut scored: Vec<(usize, f32)> = chunk_terms
            .iter()
            .enumerate()
            .filter_map(|(idx, terms)| {
                let score: f32 = query_terms
                    .iter()
                    .filter(|t| terms.contains(*t))
                    .map(|t| {
                        let df = doc_freq.get(t.as_str()).copied().unwrap_or(0) as f32;
                        ((n + 1.0) / (df + 0.5)).ln()
                    })
                    .sum();
                (score > 0.0).then_some((idx, score / query_terms.len() as f32))
            })
            .collect();

        // Stable sort keeps corpus order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(k)
            .map(|(idx, score)| RetrievedChunk {
                chunk: chunks[idx].clone(),
                score,
            })
            .collect()
    }
}

#[async_trait]
impl VectorSearch for KeywordSearcher {
    async fn search(
        &self,
        query: &str,
        notebook_id: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        if self.corpus.notebook(notebook_id).is_none() {
            return Err(EvalError::ExternalService(format!(
                "search index has no notebook {}",
                notebook_id
            )));
        }
        Ok(self.rank(query, notebook_id, k))
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "does", "did", "do", "for", "from", "how",
    "in", "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "with",
];

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
}
