//! Read-side views of datasets and runs.

use super::compare::fmt_optional;
use super::metrics::{
    DifficultyMetrics, GenerationMetrics, RetrievalMetrics, aggregate_by_difficulty,
};
use super::model::{
    DatasetStatus, EvaluationDataset, EvaluationRun, EvaluationType, RunStatus, TestCase,
    TestCaseResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dataset without its test cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: String,
    pub notebook_id: String,
    pub name: String,
    pub status: DatasetStatus,
    pub questions_per_chunk: usize,
    pub max_chunks_sample: usize,
    pub test_case_count: usize,
    /// Test cases without a difficulty label.
    pub unclassified_count: usize,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&EvaluationDataset> for DatasetSummary {
    fn from(dataset: &EvaluationDataset) -> Self {
        Self {
            id: dataset.id.clone(),
            notebook_id: dataset.notebook_id.clone(),
            name: dataset.name.clone(),
            status: dataset.status,
            questions_per_chunk: dataset.questions_per_chunk,
            max_chunks_sample: dataset.max_chunks_sample,
            test_case_count: dataset.test_cases.len(),
            unclassified_count: dataset.unclassified_count(),
            error_message: dataset.error_message.clone(),
            created_at: dataset.created_at,
            updated_at: dataset.updated_at,
        }
    }
}

impl DatasetSummary {
    pub fn print_summary(&self) {
        println!("\n========== Dataset ==========");
        println!("ID:       {}", self.id);
        println!("Name:     {}", self.name);
        println!("Notebook: {}", self.notebook_id);
        println!("Status:   {}", self.status);
        println!(
            "Params:   {} questions/chunk, up to {} chunks",
            self.questions_per_chunk, self.max_chunks_sample
        );
        println!(
            "Cases:    {} ({} without difficulty)",
            self.test_case_count, self.unclassified_count
        );
        if let Some(ref error) = self.error_message {
            println!("Error:    {}", error);
        }
        println!("=============================\n");
    }

    /// One line for listings.
    pub fn row(&self) -> String {
        format!(
            "{}  {:<10} {:>4} cases  {}  {}",
            self.id,
            self.status,
            self.test_case_count,
            self.created_at.format("%Y-%m-%d %H:%M"),
            self.name
        )
    }
}

/// Dataset with its test cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDetail {
    #[serde(flatten)]
    pub summary: DatasetSummary,
    pub test_cases: Vec<TestCase>,
}

impl From<&EvaluationDataset> for DatasetDetail {
    fn from(dataset: &EvaluationDataset) -> Self {
        Self {
            summary: DatasetSummary::from(dataset),
            test_cases: dataset.test_cases.clone(),
        }
    }
}

impl DatasetDetail {
    pub fn print_summary(&self) {
        self.summary.print_summary();
        for (idx, tc) in self.test_cases.iter().enumerate() {
            let difficulty = tc.difficulty.map(|d| d.as_str()).unwrap_or("-");
            println!(
                "{:>3}. [{}] {} (chunk {})",
                idx + 1,
                difficulty,
                tc.question,
                tc.source_chunk_id
            );
        }
    }
}

/// Run without per-case results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub dataset_id: String,
    pub status: RunStatus,
    pub k: usize,
    pub evaluation_type: EvaluationType,
    pub metrics: Option<RetrievalMetrics>,
    pub generation_metrics: Option<GenerationMetrics>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&EvaluationRun> for RunSummary {
    fn from(run: &EvaluationRun) -> Self {
        Self {
            id: run.id.clone(),
            dataset_id: run.dataset_id.clone(),
            status: run.status,
            k: run.k,
            evaluation_type: run.evaluation_type,
            metrics: run.metrics,
            generation_metrics: run.generation_metrics,
            error_message: run.error_message.clone(),
            created_at: run.created_at,
            updated_at: run.updated_at,
        }
    }
}

impl RunSummary {
    /// One line for listings.
    pub fn row(&self) -> String {
        let (hit_rate, mrr) = self
            .metrics
            .map(|m| (Some(m.hit_rate_at_k), Some(m.mrr)))
            .unwrap_or((None, None));
        format!(
            "{}  {:<10} {:<14} k={:<3} hit={} mrr={}  {}",
            self.id,
            self.status,
            self.evaluation_type,
            self.k,
            fmt_optional(hit_rate),
            fmt_optional(mrr),
            self.created_at.format("%Y-%m-%d %H:%M"),
        )
    }
}

/// Run with results and the per-difficulty breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub summary: RunSummary,
    /// `None` when no test case carries a difficulty.
    pub metrics_by_difficulty: Option<Vec<DifficultyMetrics>>,
    /// Results whose test case has no difficulty label.
    pub unclassified_count: usize,
    /// Judge calls that fell back to the default score.
    pub judge_failures: usize,
    pub results: Vec<TestCaseResult>,
}

impl RunDetail {
    /// Build the detail view. `dataset` supplies difficulty labels; without
    /// it every result counts as unclassified.
    pub fn new(run: &EvaluationRun, dataset: Option<&EvaluationDataset>) -> Self {
        let labels: HashMap<&str, _> = dataset
            .map(|d| {
                d.test_cases
                    .iter()
                    .map(|tc| (tc.id.as_str(), tc.difficulty))
                    .collect()
            })
            .unwrap_or_default();

        let breakdown = aggregate_by_difficulty(
            run.results.iter().map(|r| {
                let difficulty = labels.get(r.test_case_id.as_str()).copied().flatten();
                (difficulty, r.metrics)
            }),
            run.k,
        );

        Self {
            summary: RunSummary::from(run),
            metrics_by_difficulty: (!breakdown.groups.is_empty()).then_some(breakdown.groups),
            unclassified_count: breakdown.unclassified_count,
            judge_failures: run.judge_failures(),
            results: run.results.clone(),
        }
    }

    pub fn print_summary(&self) {
        let s = &self.summary;
        println!("\n========== Evaluation Run ==========");
        println!("ID:      {}", s.id);
        println!("Dataset: {}", s.dataset_id);
        println!("Type:    {} (k = {})", s.evaluation_type, s.k);
        println!("Status:  {}", s.status);
        if let Some(ref error) = s.error_message {
            println!("Error:   {}", error);
        }
        if let Some(m) = s.metrics {
            println!("------------------------------------");
            println!("Precision@{}: {:.3}", s.k, m.precision_at_k);
            println!("Recall@{}:    {:.3}", s.k, m.recall_at_k);
            println!("Hit rate@{}:  {:.3}", s.k, m.hit_rate_at_k);
            println!("MRR:          {:.3}", m.mrr);
            println!("NDCG@{}:      {:.3}", s.k, m.ndcg_at_k);
            println!("MAP@{}:       {:.3}", s.k, m.map_at_k);
        }
        if let Some(g) = s.generation_metrics {
            println!("------------------------------------");
            println!("Faithfulness:     {:.3}", g.mean_faithfulness);
            println!("Answer relevancy: {:.3}", g.mean_answer_relevancy);
            if self.judge_failures > 0 {
                println!("Judge failures:   {} (scored 0.0)", self.judge_failures);
            }
        }
        if let Some(ref groups) = self.metrics_by_difficulty {
            println!("------------------------------------");
            println!(
                "{:<12} {:>5} {:>6} {:>6} {:>6} {:>6}",
                "Difficulty", "Cases", "P@k", "R@k", "Hit@k", "MRR"
            );
            for g in groups {
                println!(
                    "{:<12} {:>5} {:>6.3} {:>6.3} {:>6.3} {:>6.3}",
                    g.difficulty.as_str(),
                    g.test_case_count,
                    g.precision_at_k,
                    g.recall_at_k,
                    g.hit_rate_at_k,
                    g.mrr
                );
            }
        }
        if s.status == RunStatus::Completed {
            println!("Unclassified cases: {}", self.unclassified_count);
        }
        println!("====================================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Chunk;
    use crate::eval::metrics::aggregate_retrieval;
    use crate::eval::model::Difficulty;
    use crate::search::RetrievedChunk;

    fn dataset(labels: &[Option<Difficulty>]) -> EvaluationDataset {
        let cases = labels
            .iter()
            .enumerate()
            .map(|(i, d)| TestCase::from_chunk(format!("q{}", i), &format!("c{}", i), *d))
            .collect();
        EvaluationDataset::create("nb", "ds", 1, 10)
            .unwrap()
            .mark_generating()
            .unwrap()
            .mark_completed(cases)
            .unwrap()
    }

    fn run_hitting_everything(ds: &EvaluationDataset) -> EvaluationRun {
        let results: Vec<TestCaseResult> = ds
            .test_cases
            .iter()
            .map(|tc| {
                let hit = RetrievedChunk {
                    chunk: Chunk::new(tc.source_chunk_id.clone(), ""),
                    score: 1.0,
                };
                TestCaseResult::from_retrieval(tc, &[hit], 5)
            })
            .collect();
        let cases: Vec<_> = results.iter().map(|r| r.metrics).collect();
        EvaluationRun::create(ds.id.clone(), 5, EvaluationType::RetrievalOnly)
            .unwrap()
            .mark_running()
            .unwrap()
            .mark_completed(aggregate_retrieval(&cases, 5).unwrap(), results, None)
            .unwrap()
    }

    #[test]
    fn test_dataset_summary_counts_unclassified() {
        let ds = dataset(&[Some(Difficulty::Factual), None, None]);
        let summary = DatasetSummary::from(&ds);
        assert_eq!(summary.test_case_count, 3);
        assert_eq!(summary.unclassified_count, 2);
        assert_eq!(summary.status, DatasetStatus::Completed);
    }

    #[test]
    fn test_run_detail_breakdown() {
        let ds = dataset(&[
            Some(Difficulty::Paraphrased),
            Some(Difficulty::Factual),
            None,
            Some(Difficulty::Factual),
        ]);
        let detail = RunDetail::new(&run_hitting_everything(&ds), Some(&ds));

        let groups = detail.metrics_by_difficulty.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].difficulty, Difficulty::Factual);
        assert_eq!(groups[0].test_case_count, 2);
        assert_eq!(groups[1].difficulty, Difficulty::Paraphrased);
        assert_eq!(detail.unclassified_count, 1);
        assert_eq!(detail.judge_failures, 0);
    }

    #[test]
    fn test_run_detail_without_labels() {
        let ds = dataset(&[None, None]);
        let detail = RunDetail::new(&run_hitting_everything(&ds), Some(&ds));
        assert!(detail.metrics_by_difficulty.is_none());
        assert_eq!(detail.unclassified_count, 2);
    }

    #[test]
    fn test_run_detail_json_shape() {
        let ds = dataset(&[Some(Difficulty::Analytical)]);
        let detail = RunDetail::new(&run_hitting_everything(&ds), Some(&ds));
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["evaluation_type"], "retrieval_only");
        assert_eq!(json["metrics"]["hit_rate_at_k"], 1.0);
        assert_eq!(json["metrics_by_difficulty"][0]["difficulty"], "analytical");
        assert!(json["generation_metrics"].is_null());
    }
}
