//! Retrieval metrics for a single test case and their aggregates.
//!
//! Per-case metrics work on the ranked list of retrieved chunk ids and the
//! ground-truth set of a test case:
//!
//! | Metric | Definition |
//! |--------|------------|
//! | Precision@k | relevant retrieved / retrieved (0 when nothing was retrieved) |
//! | Recall@k | relevant retrieved / \|ground truth\| |
//! | Hit@k | any relevant id retrieved |
//! | RR | 1 / rank of the first relevant id, 0 if none |
//! | NDCG@k | binary-gain DCG over the ideal DCG |
//! | AP@k | mean precision at each relevant rank |
//!
//! Only the top `k` retrieved ids are considered and the list is never
//! padded. A relevant id retrieved twice counts once.
//!
//! Aggregates are arithmetic means over cases; the hit rate is the mean of
//! `hit` as 0/1. Aggregating zero cases is a validation error.

use super::model::Difficulty;
use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Retrieval metrics for one test case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaseMetrics {
    pub precision: f64,
    pub recall: f64,
    pub hit: bool,
    pub reciprocal_rank: f64,
    pub ndcg: f64,
    pub average_precision: f64,
}

impl CaseMetrics {
    /// Compute every per-case metric at cutoff `k`.
    pub fn compute<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<&str>, k: usize) -> Self {
        Self {
            precision: precision_at_k(retrieved, relevant, k),
            recall: recall_at_k(retrieved, relevant, k),
            hit: hit_at_k(retrieved, relevant, k),
            reciprocal_rank: reciprocal_rank(retrieved, relevant, k),
            ndcg: ndcg_at_k(retrieved, relevant, k),
            average_precision: average_precision_at_k(retrieved, relevant, k),
        }
    }
}

/// Aggregated retrieval metrics over a set of cases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub hit_rate_at_k: f64,
    pub mrr: f64,
    pub ndcg_at_k: f64,
    pub map_at_k: f64,
    pub k: usize,
}

/// Aggregated judge scores over a full RAG run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    pub mean_faithfulness: f64,
    pub mean_answer_relevancy: f64,
}

/// Retrieval means restricted to one difficulty label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyMetrics {
    pub difficulty: Difficulty,
    pub test_case_count: usize,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub hit_rate_at_k: f64,
    pub mrr: f64,
}

/// Per-difficulty groups plus the number of cases that had no label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DifficultyBreakdown {
    pub groups: Vec<DifficultyMetrics>,
    pub unclassified_count: usize,
}

#[inline]
fn is_relevant(relevant: &HashSet<&str>, id: &str) -> bool {
    relevant.contains(id)
}

/// The relevant-and-first-seen ranks (1-based) within the top `k`.
fn relevant_ranks<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<&str>, k: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    retrieved
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, id)| {
            let id: &str = id.as_ref();
            is_relevant(relevant, id) && seen.insert(id.to_string())
        })
        .map(|(i, _)| i + 1)
        .collect()
}

/// Precision@k: fraction of the (at most `k`) retrieved ids that are relevant.
pub fn precision_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<&str>, k: usize) -> f64 {
    let considered = retrieved.len().min(k);
    if considered == 0 {
        return 0.0;
    }
    relevant_ranks(retrieved, relevant, k).len() as f64 / considered as f64
}

/// Recall@k: fraction of the ground truth found in the top `k`.
pub fn recall_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<&str>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    relevant_ranks(retrieved, relevant, k).len() as f64 / relevant.len() as f64
}

/// Hit@k: whether any ground-truth id appears in the top `k`.
pub fn hit_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<&str>, k: usize) -> bool {
    retrieved
        .iter()
        .take(k)
        .any(|id| is_relevant(relevant, id.as_ref()))
}

/// Reciprocal rank of the first ground-truth id in the top `k`, else 0.
pub fn reciprocal_rank<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<&str>, k: usize) -> f64 {
    retrieved
        .iter()
        .take(k)
        .position(|id| is_relevant(relevant, id.as_ref()))
        .map(|idx| 1.0 / (idx + 1) as f64)
        .unwrap_or(0.0)
}

/// NDCG@k with binary gains.
pub fn ndcg_at_k<S: AsRef<str>>(retrieved: &[S], relevant: &HashSet<&str>, k: usize) -> f64 {
    let ideal_hits = relevant.len().min(k);
    if ideal_hits == 0 {
        return 0.0;
    }
    let dcg: f64 = relevant_ranks(retrieved, relevant, k)
        .into_iter()
        .map(discount)
        .sum();
    let idcg: f64 = (1..=ideal_hits).map(discount).sum();
    dcg / idcg
}

/// AP@k: precision at each relevant rank, averaged over `min(|relevant|, k)`.
pub fn average_precision_at_k<S: AsRef<str>>(
    retrieved: &[S],
    relevant: &HashSet<&str>,
    k: usize,
) -> f64 {
    let denominator = relevant.len().min(k);
    if denominator == 0 {
        return 0.0;
    }
    let sum: f64 = relevant_ranks(retrieved, relevant, k)
        .into_iter()
        .enumerate()
        .map(|(hits_before, rank)| (hits_before + 1) as f64 / rank as f64)
        .sum();
    sum / denominator as f64
}

#[inline]
fn discount(rank: usize) -> f64 {
    1.0 / ((rank + 1) as f64).log2()
}

/// Mean of each retrieval metric over `cases`.
pub fn aggregate_retrieval(cases: &[CaseMetrics], k: usize) -> Result<RetrievalMetrics> {
    if cases.is_empty() {
        return Err(EvalError::Validation(
            "cannot aggregate retrieval metrics over zero test cases".to_string(),
        ));
    }
    let n = cases.len() as f64;
    let mean = |f: fn(&CaseMetrics) -> f64| cases.iter().map(f).sum::<f64>() / n;

    Ok(RetrievalMetrics {
        precision_at_k: mean(|c| c.precision),
        recall_at_k: mean(|c| c.recall),
        hit_rate_at_k: mean(|c| if c.hit { 1.0 } else { 0.0 }),
        mrr: mean(|c| c.reciprocal_rank),
        ndcg_at_k: mean(|c| c.ndcg),
        map_at_k: mean(|c| c.average_precision),
        k,
    })
}

/// Mean faithfulness and relevancy over `(faithfulness, relevancy)` pairs.
pub fn aggregate_generation(scores: &[(f64, f64)]) -> Result<GenerationMetrics> {
    if scores.is_empty() {
        return Err(EvalError::Validation(
            "cannot aggregate generation metrics over zero test cases".to_string(),
        ));
    }
    let n = scores.len() as f64;
    Ok(GenerationMetrics {
        mean_faithfulness: scores.iter().map(|s| s.0).sum::<f64>() / n,
        mean_answer_relevancy: scores.iter().map(|s| s.1).sum::<f64>() / n,
    })
}

/// Group cases by difficulty and aggregate each group.
///
/// Unlabelled cases are left out of every group and only counted.
/// Groups come back in taxonomy order.
pub fn aggregate_by_difficulty<I>(cases: I, k: usize) -> DifficultyBreakdown
where
    I: IntoIterator<Item = (Option<Difficulty>, CaseMetrics)>,
{
    let mut grouped: BTreeMap<Difficulty, Vec<CaseMetrics>> = BTreeMap::new();
    let mut unclassified_count = 0;

    for (difficulty, metrics) in cases {
        match difficulty {
            Some(d) => grouped.entry(d).or_default().push(metrics),
            None => unclassified_count += 1,
        }
    }

    let groups = grouped
        .into_iter()
        .filter_map(|(difficulty, group)| {
            // Groups are never empty, so aggregation cannot fail here.
            let agg = aggregate_retrieval(&group, k).ok()?;
            Some(DifficultyMetrics {
                difficulty,
                test_case_count: group.len(),
                precision_at_k: agg.precision_at_k,
                recall_at_k: agg.recall_at_k,
                hit_rate_at_k: agg.hit_rate_at_k,
                mrr: agg.mrr,
            })
        })
        .collect();

    DifficultyBreakdown {
        groups,
        unclassified_count,
    }
}
