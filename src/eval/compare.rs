//! Side-by-side comparison of completed runs over one dataset.

use super::metrics::RetrievalMetrics;
use super::model::{Difficulty, EvaluationRun, EvaluationType, RunStatus, TestCaseResult};
use crate::error::{EvalError, Result};
use crate::store::EvalRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const MIN_COMPARED_RUNS: usize = 2;
pub const MAX_COMPARED_RUNS: usize = 10;

/// Aggregate metrics of one run, as a comparison table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunComparisonMetrics {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub evaluation_type: EvaluationType,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub hit_rate_at_k: f64,
    pub mrr: f64,
    pub ndcg_at_k: f64,
    pub map_at_k: f64,
    /// `None` unless the run is full RAG.
    pub mean_faithfulness: Option<f64>,
    pub mean_answer_relevancy: Option<f64>,
}

impl RunComparisonMetrics {
    fn new(run: &EvaluationRun, metrics: &RetrievalMetrics) -> Self {
        Self {
            run_id: run.id.clone(),
            created_at: run.created_at,
            evaluation_type: run.evaluation_type,
            precision_at_k: metrics.precision_at_k,
            recall_at_k: metrics.recall_at_k,
            hit_rate_at_k: metrics.hit_rate_at_k,
            mrr: metrics.mrr,
            ndcg_at_k: metrics.ndcg_at_k,
            map_at_k: metrics.map_at_k,
            mean_faithfulness: run.generation_metrics.map(|g| g.mean_faithfulness),
            mean_answer_relevancy: run.generation_metrics.map(|g| g.mean_answer_relevancy),
        }
    }
}

/// One run's outcome for a single test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseComparisonEntry {
    pub run_id: String,
    pub retrieved_chunk_ids: Vec<String>,
    pub precision: f64,
    pub recall: f64,
    pub hit: bool,
    pub reciprocal_rank: f64,
    pub faithfulness: Option<f64>,
    pub answer_relevancy: Option<f64>,
    pub generated_answer: Option<String>,
}

impl TestCaseComparisonEntry {
    fn new(run_id: &str, result: &TestCaseResult) -> Self {
        Self {
            run_id: run_id.to_string(),
            retrieved_chunk_ids: result.retrieved_chunk_ids.clone(),
            precision: result.metrics.precision,
            recall: result.metrics.recall,
            hit: result.metrics.hit,
            reciprocal_rank: result.metrics.reciprocal_rank,
            faithfulness: result.faithfulness,
            answer_relevancy: result.answer_relevancy,
            generated_answer: result.generated_answer.clone(),
        }
    }
}

/// All runs' outcomes for one test case, in run order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseComparison {
    pub test_case_id: String,
    pub question: String,
    pub difficulty: Option<Difficulty>,
    pub entries: Vec<TestCaseComparisonEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunComparison {
    pub dataset_id: String,
    pub k: usize,
    pub run_count: usize,
    /// Same order as the requested run ids.
    pub aggregate_metrics: Vec<RunComparisonMetrics>,
    /// Same order as the dataset's test cases.
    pub test_case_comparisons: Vec<TestCaseComparison>,
}

impl RunComparison {
    /// Print the aggregate table and per-case hits to stdout.
    pub fn print_summary(&self) {
        println!("\n========== Run Comparison ==========");
        println!("Dataset: {}", self.dataset_id);
        println!("Runs: {} | k = {}", self.run_count, self.k);
        println!("------------------------------------");
        println!(
            "{:<34} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
            "Run", "P@k", "R@k", "Hit@k", "MRR", "Faith", "Relev"
        );
        for row in &self.aggregate_metrics {
            println!(
                "{:<34} {:>6.3} {:>6.3} {:>6.3} {:>6.3} {:>6} {:>6}",
                row.run_id,
                row.precision_at_k,
                row.recall_at_k,
                row.hit_rate_at_k,
                row.mrr,
                fmt_optional(row.mean_faithfulness),
                fmt_optional(row.mean_answer_relevancy),
            );
        }
        println!("------------------------------------");
        for case in &self.test_case_comparisons {
            let hits: Vec<&str> = case
                .entries
                .iter()
                .map(|e| if e.hit { "hit" } else { "miss" })
                .collect();
            let difficulty = case.difficulty.map(|d| d.as_str()).unwrap_or("-");
            println!("[{}] {} => {}", difficulty, case.question, hits.join(" | "));
        }
        println!("====================================\n");
    }
}

pub(crate) fn fmt_optional(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "-".to_string())
}

/// Validates and assembles run comparisons.
pub struct RunComparator {
    repository: Arc<dyn EvalRepository>,
}

impl RunComparator {
    pub fn new(repository: Arc<dyn EvalRepository>) -> Self {
        Self { repository }
    }

    /// Compare `run_ids`, checking existence, count, dataset, `k` and
    /// completion in that order.
    pub async fn compare(&self, run_ids: &[String]) -> Result<RunComparison> {
        let found = self.repository.find_runs(run_ids).await?;
        let missing: Vec<String> = run_ids
            .iter()
            .zip(&found)
            .filter(|(_, run)| run.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(EvalError::RunsNotFound(missing));
        }
        let runs: Vec<EvaluationRun> = found.into_iter().flatten().collect();

        validate_runs(&runs)?;

        let dataset_id = runs[0].dataset_id.clone();
        let dataset = self
            .repository
            .find_dataset(&dataset_id)
            .await?
            .ok_or_else(|| EvalError::not_found("Dataset", &dataset_id))?;

        let aggregate_metrics = runs
            .iter()
            .map(|run| {
                let metrics = run.metrics.as_ref().ok_or_else(|| {
                    EvalError::RunNotCompleted(vec![run.id.clone()])
                })?;
                Ok(RunComparisonMetrics::new(run, metrics))
            })
            .collect::<Result<Vec<_>>>()?;

        let by_case: Vec<HashMap<&str, &TestCaseResult>> = runs
            .iter()
            .map(|run| {
                run.results
                    .iter()
                    .map(|r| (r.test_case_id.as_str(), r))
                    .collect()
            })
            .collect();

        let test_case_comparisons = dataset
            .test_cases
            .iter()
            .map(|tc| TestCaseComparison {
                test_case_id: tc.id.clone(),
                question: tc.question.clone(),
                difficulty: tc.difficulty,
                entries: runs
                    .iter()
                    .zip(&by_case)
                    .filter_map(|(run, results)| {
                        results
                            .get(tc.id.as_str())
                            .map(|r| TestCaseComparisonEntry::new(&run.id, r))
                    })
                    .collect(),
            })
            .collect();

        Ok(RunComparison {
            dataset_id,
            k: runs[0].k,
            run_count: runs.len(),
            aggregate_metrics,
            test_case_comparisons,
        })
    }
}

/// Preconditions on already-loaded runs, after existence.
pub(crate) fn validate_runs(runs: &[EvaluationRun]) -> Result<()> {
    if !(MIN_COMPARED_RUNS..=MAX_COMPARED_RUNS).contains(&runs.len()) {
        return Err(EvalError::Validation(format!(
            "compare between {} and {} runs, got {}",
            MIN_COMPARED_RUNS,
            MAX_COMPARED_RUNS,
            runs.len()
        )));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = runs.iter().find(|r| !seen.insert(r.id.as_str())) {
        return Err(EvalError::Validation(format!(
            "run {} is listed more than once",
            dup.id
        )));
    }

    let dataset_ids = distinct(runs.iter().map(|r| r.dataset_id.clone()));
    if dataset_ids.len() > 1 {
        return Err(EvalError::DatasetMismatch(dataset_ids));
    }

    let k_values = distinct(runs.iter().map(|r| r.k));
    if k_values.len() > 1 {
        return Err(EvalError::KMismatch(k_values));
    }

    let incomplete: Vec<String> = runs
        .iter()
        .filter(|r| r.status != RunStatus::Completed)
        .map(|r| r.id.clone())
        .collect();
    if !incomplete.is_empty() {
        return Err(EvalError::RunNotCompleted(incomplete));
    }

    Ok(())
}

/// Distinct values in first-seen order.
fn distinct<T: PartialEq>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
