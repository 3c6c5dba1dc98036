//! Evaluation service: the operations exposed to callers.
//!
//! Owns the lifecycle writes around generation and execution. Every entity
//! is persisted in its working status (`generating`/`running`) before any
//! external call is made, and reaches `completed` or `failed` in a single
//! terminal write.

use super::compare::{RunComparator, RunComparison};
use super::executor::RunExecutor;
use super::generator::{GenerationParams, SyntheticTestGenerator};
use super::judge::LlmJudge;
use super::model::{DatasetStatus, EvaluationDataset, EvaluationRun, EvaluationType, RunStatus};
use super::summary::{DatasetDetail, DatasetSummary, RunDetail, RunSummary};
use crate::config::{EvalConfig, LlmConfig};
use crate::corpus::ChunkSource;
use crate::error::{EvalError, Result};
use crate::llm::CompletionModel;
use crate::search::VectorSearch;
use crate::store::EvalRepository;
use std::sync::Arc;
use tracing::{info, warn};

/// Message recorded on work found unfinished at start-up.
pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// Request to synthesise a dataset.
#[derive(Debug, Clone)]
pub struct GenerateDataset {
    pub notebook_id: String,
    pub name: String,
    pub questions_per_chunk: usize,
    pub max_chunks_sample: usize,
    pub seed: Option<u64>,
}

/// Request to evaluate a dataset.
#[derive(Debug, Clone)]
pub struct RunEvaluation {
    pub dataset_id: String,
    pub k: usize,
    pub evaluation_type: EvaluationType,
}

/// Entities moved to `failed` by [`EvaluationService::fail_interrupted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub datasets: usize,
    pub runs: usize,
}

pub struct EvaluationService {
    repository: Arc<dyn EvalRepository>,
    chunks: Arc<dyn ChunkSource>,
    generator: SyntheticTestGenerator,
    executor: RunExecutor,
    comparator: RunComparator,
}

impl EvaluationService {
    /// Wire the service. `llm.model` answers full RAG questions and
    /// `llm.eval_model` generates questions and judges answers.
    pub fn new(
        repository: Arc<dyn EvalRepository>,
        chunks: Arc<dyn ChunkSource>,
        search: Arc<dyn VectorSearch>,
        completion: Arc<dyn CompletionModel>,
        llm: &LlmConfig,
        eval: &EvalConfig,
    ) -> Self {
        let generator =
            SyntheticTestGenerator::new(completion.clone(), &llm.eval_model, eval.concurrency);
        let judge = LlmJudge::new(completion.clone(), &llm.eval_model);
        let executor = RunExecutor::new(
            repository.clone(),
            search,
            completion,
            judge,
            &llm.model,
            eval.concurrency,
        );
        Self {
            comparator: RunComparator::new(repository.clone()),
            repository,
            chunks,
            generator,
            executor,
        }
    }

    /// Generate a dataset for a notebook.
    ///
    /// The returned summary is `completed`. On failure the dataset is kept as
    /// `failed` and the error is returned.
    pub async fn create_dataset(&self, cmd: GenerateDataset) -> Result<DatasetSummary> {
        let dataset = EvaluationDataset::create(
            &cmd.notebook_id,
            &cmd.name,
            cmd.questions_per_chunk,
            cmd.max_chunks_sample,
        )?;
        if !self.chunks.notebook_exists(&cmd.notebook_id).await? {
            return Err(EvalError::not_found("Notebook", &cmd.notebook_id));
        }

        self.repository.insert_dataset(&dataset).await?;
        let generating = dataset.mark_generating()?;
        self.repository.replace_dataset(&generating).await?;
        info!(
            dataset_id = %generating.id,
            notebook_id = %generating.notebook_id,
            "Generating dataset '{}'",
            generating.name
        );

        let params = GenerationParams {
            questions_per_chunk: cmd.questions_per_chunk,
            max_chunks_sample: cmd.max_chunks_sample,
            seed: cmd.seed,
        };
        let generated = match self.chunks.list_chunks(&cmd.notebook_id).await {
            Ok(chunks) => self.generator.generate_test_cases(&chunks, params).await,
            Err(e) => Err(e),
        };

        match generated {
            Ok(test_cases) => {
                let completed = generating.mark_completed(test_cases)?;
                self.repository.replace_dataset(&completed).await?;
                info!(
                    dataset_id = %completed.id,
                    "Dataset completed with {} test cases",
                    completed.test_cases.len()
                );
                Ok(DatasetSummary::from(&completed))
            }
            Err(e) => {
                warn!(dataset_id = %generating.id, error = %e, "Dataset generation failed");
                let failed = generating.mark_failed(e.to_string())?;
                self.repository.replace_dataset(&failed).await?;
                Err(e)
            }
        }
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<DatasetDetail> {
        let dataset = self.load_dataset(dataset_id).await?;
        Ok(DatasetDetail::from(&dataset))
    }

    /// Datasets of a notebook, newest first.
    pub async fn list_datasets(&self, notebook_id: &str) -> Result<Vec<DatasetSummary>> {
        if !self.chunks.notebook_exists(notebook_id).await? {
            return Err(EvalError::not_found("Notebook", notebook_id));
        }
        let datasets = self.repository.list_datasets(notebook_id).await?;
        Ok(datasets.iter().map(DatasetSummary::from).collect())
    }

    /// Evaluate a completed dataset.
    pub async fn run_evaluation(&self, cmd: RunEvaluation) -> Result<RunDetail> {
        let run = EvaluationRun::create(&cmd.dataset_id, cmd.k, cmd.evaluation_type)?;
        let dataset = self.load_dataset(&cmd.dataset_id).await?;
        if !dataset.status.is_runnable() {
            return Err(EvalError::DatasetNotRunnable {
                id: dataset.id.clone(),
                status: dataset.status.to_string(),
            });
        }

        self.repository.insert_run(&run).await?;
        let completed = self.executor.execute(&dataset, &run).await?;
        Ok(RunDetail::new(&completed, Some(&dataset)))
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunDetail> {
        let run = self
            .repository
            .find_run(run_id)
            .await?
            .ok_or_else(|| EvalError::not_found("Run", run_id))?;
        let dataset = self.repository.find_dataset(&run.dataset_id).await?;
        Ok(RunDetail::new(&run, dataset.as_ref()))
    }

    /// Runs of a dataset, newest first.
    pub async fn list_runs(&self, dataset_id: &str) -> Result<Vec<RunSummary>> {
        self.load_dataset(dataset_id).await?;
        let runs = self.repository.list_runs(dataset_id).await?;
        Ok(runs.iter().map(RunSummary::from).collect())
    }

    pub async fn compare_runs(&self, run_ids: &[String]) -> Result<RunComparison> {
        self.comparator.compare(run_ids).await
    }

    /// Fail every dataset still `generating` and every run still `running`.
    ///
    /// Only valid while no generation or execution is in flight, i.e. at
    /// process start-up.
    pub async fn fail_interrupted(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for dataset in self.repository.all_datasets().await? {
            if dataset.status == DatasetStatus::Generating {
                let failed = dataset.mark_failed(INTERRUPTED_MESSAGE)?;
                self.repository.replace_dataset(&failed).await?;
                report.datasets += 1;
            }
        }
        for run in self.repository.all_runs().await? {
            if run.status == RunStatus::Running {
                let failed = run.mark_failed(INTERRUPTED_MESSAGE)?;
                self.repository.replace_run(&failed).await?;
                report.runs += 1;
            }
        }

        if report != RecoveryReport::default() {
            warn!(
                datasets = report.datasets,
                runs = report.runs,
                "Marked interrupted work as failed"
            );
        }
        Ok(report)
    }

    async fn load_dataset(&self, dataset_id: &str) -> Result<EvaluationDataset> {
        self.repository
            .find_dataset(dataset_id)
            .await?
            .ok_or_else(|| EvalError::not_found("Dataset", dataset_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{Chunk, Corpus, CorpusDocument, DocumentStatus, Notebook};
    use crate::error::ErrorKind;
    use crate::llm::Prompts;
    use crate::search::KeywordSearcher;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    /// Question generator that asks for the passage itself, so keyword search
    /// ranks the source chunk first. Judges everything 0.75.
    struct EchoLlm;

    #[async_trait]
    impl CompletionModel for EchoLlm {
        async fn complete(&self, system: Option<&str>, prompt: &str, _: &str) -> Result<String> {
            if system == Some(Prompts::question_generator_system()) {
                let passage = prompt
                    .split("Passage:\n")
                    .nth(1)
                    .and_then(|rest| rest.split("\n\nReturn").next())
                    .unwrap_or_default();
                let body = serde_json::json!({
                    "questions": [{"text": passage, "difficulty": "factual"}, passage]
                });
                Ok(body.to_string())
            } else if system == Some(Prompts::rag_answer_system()) {
                Ok("An answer [1].".to_string())
            } else {
                Ok(r#"{"score": 0.75, "reasoning": "ok"}"#.to_string())
            }
        }
    }

    fn corpus() -> Arc<Corpus> {
        let doc = |id: &str, status, chunks: Vec<Chunk>| CorpusDocument {
            id: id.to_string(),
            title: None,
            status,
            chunks,
        };
        Arc::new(Corpus {
            notebooks: vec![
                Notebook {
                    id: "nb".into(),
                    name: "Rust".into(),
                    documents: vec![doc(
                        "d1",
                        DocumentStatus::Completed,
                        vec![
                            Chunk::new("ownership", "ownership moves values between bindings"),
                            Chunk::new("borrowing", "borrowing lends references without moving"),
                            Chunk::new("lifetimes", "lifetimes bound how long references live"),
                        ],
                    )],
                },
                Notebook {
                    id: "draft".into(),
                    name: String::new(),
                    documents: vec![doc(
                        "d2",
                        DocumentStatus::Processing,
                        vec![Chunk::new("x", "unfinished")],
                    )],
                },
            ],
        })
    }

    fn service() -> (EvaluationService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let corpus = corpus();
        let service = EvaluationService::new(
            store.clone(),
            corpus.clone(),
            Arc::new(KeywordSearcher::new(corpus)),
            Arc::new(EchoLlm),
            &LlmConfig::default(),
            &EvalConfig::default(),
        );
        (service, store)
    }

    fn generate(notebook_id: &str) -> GenerateDataset {
        GenerateDataset {
            notebook_id: notebook_id.to_string(),
            name: "baseline".to_string(),
            questions_per_chunk: 2,
            max_chunks_sample: 50,
            seed: Some(42),
        }
    }

    fn evaluate(dataset_id: &str, k: usize, evaluation_type: EvaluationType) -> RunEvaluation {
        RunEvaluation {
            dataset_id: dataset_id.to_string(),
            k,
            evaluation_type,
        }
    }

    #[tokio::test]
    async fn test_generate_and_run() {
        let (service, _) = service();
        let summary = service.create_dataset(generate("nb")).await.unwrap();
        assert_eq!(summary.status, DatasetStatus::Completed);
        assert_eq!(summary.test_case_count, 6);
        assert_eq!(summary.unclassified_count, 3);

        let detail = service
            .run_evaluation(evaluate(&summary.id, 3, EvaluationType::RetrievalOnly))
            .await
            .unwrap();
        let metrics = detail.summary.metrics.unwrap();
        assert_eq!(metrics.hit_rate_at_k, 1.0);
        assert_eq!(metrics.mrr, 1.0);
        assert_eq!(detail.results.len(), 6);
        assert_eq!(detail.unclassified_count, 3);
        let groups = detail.metrics_by_difficulty.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].test_case_count, 3);

        let fetched = service.get_run(&detail.summary.id).await.unwrap();
        assert_eq!(fetched.results, detail.results);
    }

    #[tokio::test]
    async fn test_full_rag_and_compare() {
        let (service, _) = service();
        let ds = service.create_dataset(generate("nb")).await.unwrap();
        let a = service
            .run_evaluation(evaluate(&ds.id, 3, EvaluationType::RetrievalOnly))
            .await
            .unwrap();
        let b = service
            .run_evaluation(evaluate(&ds.id, 3, EvaluationType::FullRag))
            .await
            .unwrap();
        let generation = b.summary.generation_metrics.unwrap();
        assert_eq!(generation.mean_faithfulness, 0.75);

        let ids = vec![a.summary.id.clone(), b.summary.id.clone()];
        let cmp = service.compare_runs(&ids).await.unwrap();
        assert_eq!(cmp.run_count, 2);
        assert_eq!(cmp.test_case_comparisons.len(), 6);
        assert!(cmp.aggregate_metrics[0].mean_faithfulness.is_none());
        assert_eq!(cmp.aggregate_metrics[1].mean_faithfulness, Some(0.75));

        let runs = service.list_runs(&ds.id).await.unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_notebook() {
        let (service, store) = service();
        let err = service.create_dataset(generate("missing")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.all_datasets().await.unwrap().is_empty());
        assert!(service.list_datasets("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_no_completed_documents_fails_dataset() {
        let (service, _) = service();
        let err = service.create_dataset(generate("draft")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoEligibleContent);

        let listed = service.list_datasets("draft").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, DatasetStatus::Failed);
        assert_eq!(listed[0].test_case_count, 0);
        assert!(listed[0].error_message.is_some());

        let err = service
            .run_evaluation(evaluate(&listed[0].id, 5, EvaluationType::RetrievalOnly))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_invalid_parameters_create_nothing() {
        let (service, store) = service();
        let mut cmd = generate("nb");
        cmd.questions_per_chunk = 11;
        assert!(matches!(
            service.create_dataset(cmd).await,
            Err(EvalError::Validation(_))
        ));
        assert!(store.all_datasets().await.unwrap().is_empty());

        let ds = service.create_dataset(generate("nb")).await.unwrap();
        let err = service
            .run_evaluation(evaluate(&ds.id, 51, EvaluationType::RetrievalOnly))
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Validation(_)));
        assert!(store.all_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_interrupted() {
        let (service, store) = service();
        let stuck = EvaluationDataset::create("nb", "stuck", 1, 5).unwrap();
        store.insert_dataset(&stuck).await.unwrap();
        store
            .replace_dataset(&stuck.mark_generating().unwrap())
            .await
            .unwrap();

        let ds = service.create_dataset(generate("nb")).await.unwrap();
        let run = EvaluationRun::create(&ds.id, 5, EvaluationType::FullRag).unwrap();
        store.insert_run(&run).await.unwrap();
        store.replace_run(&run.mark_running().unwrap()).await.unwrap();

        let report = service.fail_interrupted().await.unwrap();
        assert_eq!(report, RecoveryReport { datasets: 1, runs: 1 });

        let failed = service.get_run(&run.id).await.unwrap();
        assert_eq!(failed.summary.status, RunStatus::Failed);
        assert_eq!(failed.summary.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(
            service.get_dataset(&stuck.id).await.unwrap().summary.status,
            DatasetStatus::Failed
        );

        // Nothing left to recover.
        assert_eq!(service.fail_interrupted().await.unwrap(), RecoveryReport::default());
    }
}
