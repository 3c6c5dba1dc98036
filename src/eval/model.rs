//! Evaluation entities and their lifecycles.
//!
//! Entities are immutable snapshots. Every lifecycle transition borrows the
//! current snapshot and returns the next one with `version` bumped, so the
//! store can reject a write whose predecessor is no longer current.

use super::metrics::{CaseMetrics, GenerationMetrics, RetrievalMetrics};
use crate::config::MAX_K;
use crate::error::{EvalError, Result};
use crate::search::RetrievedChunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

pub const MAX_QUESTIONS_PER_CHUNK: usize = 10;
pub const MAX_CHUNKS_SAMPLE: usize = 500;
pub const MAX_NAME_LEN: usize = 255;

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Question difficulty taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Direct recall of a stated fact.
    Factual,
    /// Synthesis of several facts.
    Analytical,
    /// A conclusion beyond the explicit text.
    Inferential,
    /// A semantically equivalent rewording of the source.
    Paraphrased,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Factual,
        Difficulty::Analytical,
        Difficulty::Inferential,
        Difficulty::Paraphrased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Factual => "factual",
            Difficulty::Analytical => "analytical",
            Difficulty::Inferential => "inferential",
            Difficulty::Paraphrased => "paraphrased",
        }
    }

    /// Case-insensitive parse; unknown labels yield `None`.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|d| d.as_str() == label)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What a run evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    #[default]
    RetrievalOnly,
    FullRag,
}

impl EvaluationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationType::RetrievalOnly => "retrieval_only",
            EvaluationType::FullRag => "full_rag",
        }
    }
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EvaluationType {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "retrieval_only" => Ok(EvaluationType::RetrievalOnly),
            "full_rag" => Ok(EvaluationType::FullRag),
            other => Err(EvalError::Validation(format!(
                "invalid evaluation type '{}' (expected retrieval_only or full_rag)",
                other
            ))),
        }
    }
}

/// Dataset lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Pending => "pending",
            DatasetStatus::Generating => "generating",
            DatasetStatus::Completed => "completed",
            DatasetStatus::Failed => "failed",
        }
    }

    pub fn is_generatable(&self) -> bool {
        *self == DatasetStatus::Pending
    }

    pub fn is_runnable(&self) -> bool {
        *self == DatasetStatus::Completed
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DatasetStatus::Completed | DatasetStatus::Failed)
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_runnable(&self) -> bool {
        *self == RunStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A labelled question whose answer lives in known chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub question: String,
    pub ground_truth_chunk_ids: Vec<String>,
    pub source_chunk_id: String,
    pub difficulty: Option<Difficulty>,
    pub created_at: DateTime<Utc>,
}

impl TestCase {
    pub fn new(
        question: impl Into<String>,
        ground_truth_chunk_ids: Vec<String>,
        source_chunk_id: impl Into<String>,
        difficulty: Option<Difficulty>,
    ) -> Result<Self> {
        if ground_truth_chunk_ids.is_empty() {
            return Err(EvalError::Validation(
                "a test case needs at least one ground-truth chunk".to_string(),
            ));
        }
        Ok(Self {
            id: new_id(),
            question: question.into(),
            ground_truth_chunk_ids,
            source_chunk_id: source_chunk_id.into(),
            difficulty,
            created_at: Utc::now(),
        })
    }

    /// A question generated from `chunk_id`, which is its only ground truth.
    pub fn from_chunk(
        question: impl Into<String>,
        chunk_id: &str,
        difficulty: Option<Difficulty>,
    ) -> Self {
        Self {
            id: new_id(),
            question: question.into(),
            ground_truth_chunk_ids: vec![chunk_id.to_string()],
            source_chunk_id: chunk_id.to_string(),
            difficulty,
            created_at: Utc::now(),
        }
    }

    pub fn ground_truth(&self) -> HashSet<&str> {
        self.ground_truth_chunk_ids
            .iter()
            .map(String::as_str)
            .collect()
    }
}

/// Outcome of evaluating one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub id: String,
    pub test_case_id: String,
    /// Best first, at most `k` entries.
    pub retrieved_chunk_ids: Vec<String>,
    pub retrieved_scores: Vec<f32>,
    pub metrics: CaseMetrics,
    pub generated_answer: Option<String>,
    pub faithfulness: Option<f64>,
    pub answer_relevancy: Option<f64>,
    /// Judge calls of this case that fell back to the default score.
    #[serde(default)]
    pub judge_failures: u8,
}

impl TestCaseResult {
    /// Retrieval-only result for `test_case` at cutoff `k`.
    pub fn from_retrieval(test_case: &TestCase, retrieved: &[RetrievedChunk], k: usize) -> Self {
        let top = &retrieved[..retrieved.len().min(k)];
        let ids: Vec<String> = top.iter().map(|r| r.chunk.id.clone()).collect();
        let metrics = CaseMetrics::compute(&ids, &test_case.ground_truth(), k);
        Self {
            id: new_id(),
            test_case_id: test_case.id.clone(),
            retrieved_chunk_ids: ids,
            retrieved_scores: top.iter().map(|r| r.score).collect(),
            metrics,
            generated_answer: None,
            faithfulness: None,
            answer_relevancy: None,
            judge_failures: 0,
        }
    }

    /// Attach the generated answer and both judge scores.
    pub fn with_generation(
        mut self,
        answer: String,
        faithfulness: f64,
        answer_relevancy: f64,
        judge_failures: u8,
    ) -> Self {
        self.generated_answer = Some(answer);
        self.faithfulness = Some(faithfulness);
        self.answer_relevancy = Some(answer_relevancy);
        self.judge_failures = judge_failures;
        self
    }

    pub fn has_generation(&self) -> bool {
        self.generated_answer.is_some()
            && self.faithfulness.is_some()
            && self.answer_relevancy.is_some()
    }
}

/// Test cases synthesised from one notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDataset {
    pub id: String,
    pub notebook_id: String,
    pub name: String,
    pub status: DatasetStatus,
    pub questions_per_chunk: usize,
    pub max_chunks_sample: usize,
    pub test_cases: Vec<TestCase>,
    pub error_message: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluationDataset {
    /// A new `pending` dataset. Parameters are range-checked here.
    pub fn create(
        notebook_id: impl Into<String>,
        name: impl Into<String>,
        questions_per_chunk: usize,
        max_chunks_sample: usize,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(EvalError::Validation(format!(
                "dataset name must be 1-{} characters",
                MAX_NAME_LEN
            )));
        }
        if !(1..=MAX_QUESTIONS_PER_CHUNK).contains(&questions_per_chunk) {
            return Err(EvalError::Validation(format!(
                "questions_per_chunk must be between 1 and {}, got {}",
                MAX_QUESTIONS_PER_CHUNK, questions_per_chunk
            )));
        }
        if !(1..=MAX_CHUNKS_SAMPLE).contains(&max_chunks_sample) {
            return Err(EvalError::Validation(format!(
                "max_chunks_sample must be between 1 and {}, got {}",
                MAX_CHUNKS_SAMPLE, max_chunks_sample
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: new_id(),
            notebook_id: notebook_id.into(),
            name,
            status: DatasetStatus::Pending,
            questions_per_chunk,
            max_chunks_sample,
            test_cases: Vec::new(),
            error_message: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    fn next(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        next
    }

    pub fn mark_generating(&self) -> Result<Self> {
        if !self.status.is_generatable() {
            return Err(EvalError::StateConflict(format!(
                "cannot generate dataset {} in status {}",
                self.id, self.status
            )));
        }
        let mut next = self.next();
        next.status = DatasetStatus::Generating;
        Ok(next)
    }

    /// Commit every generated test case at once.
    pub fn mark_completed(&self, test_cases: Vec<TestCase>) -> Result<Self> {
        if self.status != DatasetStatus::Generating {
            return Err(EvalError::StateConflict(format!(
                "cannot complete dataset {} in status {}",
                self.id, self.status
            )));
        }
        if test_cases.is_empty() {
            return Err(EvalError::Validation(
                "a completed dataset needs at least one test case".to_string(),
            ));
        }
        let mut next = self.next();
        next.status = DatasetStatus::Completed;
        next.test_cases = test_cases;
        Ok(next)
    }

    pub fn mark_failed(&self, error_message: impl Into<String>) -> Result<Self> {
        if self.status != DatasetStatus::Generating {
            return Err(EvalError::StateConflict(format!(
                "cannot fail dataset {} in status {}",
                self.id, self.status
            )));
        }
        let mut next = self.next();
        next.status = DatasetStatus::Failed;
        next.test_cases.clear();
        next.error_message = Some(error_message.into());
        Ok(next)
    }

    pub fn unclassified_count(&self) -> usize {
        self.test_cases
            .iter()
            .filter(|tc| tc.difficulty.is_none())
            .count()
    }
}

/// One evaluation of a completed dataset at cutoff `k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub id: String,
    pub dataset_id: String,
    pub k: usize,
    pub evaluation_type: EvaluationType,
    pub status: RunStatus,
    pub metrics: Option<RetrievalMetrics>,
    pub generation_metrics: Option<GenerationMetrics>,
    /// In dataset test-case order.
    pub results: Vec<TestCaseResult>,
    pub error_message: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluationRun {
    pub fn create(
        dataset_id: impl Into<String>,
        k: usize,
        evaluation_type: EvaluationType,
    ) -> Result<Self> {
        if !(1..=MAX_K).contains(&k) {
            return Err(EvalError::Validation(format!(
                "k must be between 1 and {}, got {}",
                MAX_K, k
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: new_id(),
            dataset_id: dataset_id.into(),
            k,
            evaluation_type,
            status: RunStatus::Pending,
            metrics: None,
            generation_metrics: None,
            results: Vec::new(),
            error_message: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    fn next(&self) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        next
    }

    pub fn mark_running(&self) -> Result<Self> {
        if !self.status.is_runnable() {
            return Err(EvalError::StateConflict(format!(
                "cannot run evaluation {} in status {}",
                self.id, self.status
            )));
        }
        let mut next = self.next();
        next.status = RunStatus::Running;
        Ok(next)
    }

    /// Commit all results and aggregates at once.
    pub fn mark_completed(
        &self,
        metrics: RetrievalMetrics,
        results: Vec<TestCaseResult>,
        generation_metrics: Option<GenerationMetrics>,
    ) -> Result<Self> {
        if self.status != RunStatus::Running {
            return Err(EvalError::StateConflict(format!(
                "cannot complete evaluation {} in status {}",
                self.id, self.status
            )));
        }
        let full_rag = self.evaluation_type == EvaluationType::FullRag;
        if full_rag != generation_metrics.is_some() {
            return Err(EvalError::Validation(format!(
                "{} run must {}carry generation metrics",
                self.evaluation_type,
                if full_rag { "" } else { "not " }
            )));
        }
        if metrics.k != self.k {
            return Err(EvalError::Validation(format!(
                "metrics computed at k={} for a run at k={}",
                metrics.k, self.k
            )));
        }
        let mut next = self.next();
        next.status = RunStatus::Completed;
        next.metrics = Some(metrics);
        next.generation_metrics = generation_metrics;
        next.results = results;
        Ok(next)
    }

    pub fn mark_failed(&self, error_message: impl Into<String>) -> Result<Self> {
        if self.status != RunStatus::Running {
            return Err(EvalError::StateConflict(format!(
                "cannot fail evaluation {} in status {}",
                self.id, self.status
            )));
        }
        let mut next = self.next();
        next.status = RunStatus::Failed;
        next.metrics = None;
        next.generation_metrics = None;
        next.results.clear();
        next.error_message = Some(error_message.into());
        Ok(next)
    }

    pub fn judge_failures(&self) -> usize {
        self.results.iter().map(|r| r.judge_failures as usize).sum()
    }
}
