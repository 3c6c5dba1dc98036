//! Evaluation of notebook retrieval and RAG answers.
//!
//! This module provides:
//! - Synthetic test dataset generation from notebook chunks
//! - Retrieval metrics (precision, recall, hit rate, MRR, NDCG, MAP at k)
//! - LLM-as-judge scoring of generated answers
//! - Run execution, per-difficulty breakdowns and run comparison

pub mod compare;
pub mod executor;
pub mod generator;
pub mod judge;
pub mod metrics;
pub mod model;
pub mod service;
pub mod summary;

pub use compare::{RunComparator, RunComparison, RunComparisonMetrics, TestCaseComparison};
pub use executor::RunExecutor;
pub use generator::{GenerationParams, SyntheticTestGenerator};
pub use judge::{JudgeScore, LlmJudge};
pub use metrics::{CaseMetrics, DifficultyMetrics, GenerationMetrics, RetrievalMetrics};
pub use model::{
    DatasetStatus, Difficulty, EvaluationDataset, EvaluationRun, EvaluationType, RunStatus,
    TestCase, TestCaseResult,
};
pub use service::{EvaluationService, GenerateDataset, RecoveryReport, RunEvaluation};
pub use summary::{DatasetDetail, DatasetSummary, RunDetail, RunSummary};
