//! Evaluation run executor.
//!
//! Drives one [`EvaluationRun`] from `pending` to a terminal state. Test
//! cases are evaluated concurrently, up to the configured limit, and their
//! results are assembled in dataset order. Any case-level error other than a
//! judge failure aborts the whole run, which is then persisted as `failed`
//! without results.

use super::judge::LlmJudge;
use super::metrics::{
    CaseMetrics, GenerationMetrics, RetrievalMetrics, aggregate_generation, aggregate_retrieval,
};
use super::model::{EvaluationDataset, EvaluationRun, EvaluationType, TestCase, TestCaseResult};
use crate::corpus::Chunk;
use crate::error::{EvalError, Result};
use crate::llm::{CompletionModel, Prompts};
use crate::search::VectorSearch;
use crate::store::EvalRepository;
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs evaluations against a search backend and, for full RAG, an LLM.
pub struct RunExecutor {
    repository: Arc<dyn EvalRepository>,
    search: Arc<dyn VectorSearch>,
    llm: Arc<dyn CompletionModel>,
    judge: LlmJudge,
    answer_model: String,
    concurrency: usize,
}

impl RunExecutor {
    /// `answer_model` generates full RAG answers; `judge` scores them.
    pub fn new(
        repository: Arc<dyn EvalRepository>,
        search: Arc<dyn VectorSearch>,
        llm: Arc<dyn CompletionModel>,
        judge: LlmJudge,
        answer_model: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            repository,
            search,
            llm,
            judge,
            answer_model: answer_model.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Execute a stored `pending` run of `dataset`.
    ///
    /// Returns the completed run. On failure the run is stored as `failed`
    /// and the causing error is returned.
    pub async fn execute(
        &self,
        dataset: &EvaluationDataset,
        run: &EvaluationRun,
    ) -> Result<EvaluationRun> {
        if !dataset.status.is_runnable() {
            return Err(EvalError::DatasetNotRunnable {
                id: dataset.id.clone(),
                status: dataset.status.to_string(),
            });
        }
        if run.dataset_id != dataset.id {
            return Err(EvalError::Validation(format!(
                "run {} belongs to dataset {}, not {}",
                run.id, run.dataset_id, dataset.id
            )));
        }

        let running = run.mark_running()?;
        self.repository.replace_run(&running).await?;
        info!(
            run_id = %running.id,
            dataset_id = %dataset.id,
            k = running.k,
            evaluation_type = %running.evaluation_type,
            "Evaluating {} test cases",
            dataset.test_cases.len()
        );

        let start = Instant::now();
        match self.evaluate(dataset, &running).await {
            Ok((metrics, results, generation_metrics)) => {
                let completed = running.mark_completed(metrics, results, generation_metrics)?;
                self.repository.replace_run(&completed).await?;
                info!(
                    run_id = %completed.id,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "Run completed (hit rate {:.3}, MRR {:.3})",
                    metrics.hit_rate_at_k,
                    metrics.mrr
                );
                Ok(completed)
            }
            Err(e) => {
                warn!(run_id = %running.id, error = %e, "Run failed");
                let failed = running.mark_failed(e.to_string())?;
                self.repository.replace_run(&failed).await?;
                Err(e)
            }
        }
    }

    async fn evaluate(
        &self,
        dataset: &EvaluationDataset,
        run: &EvaluationRun,
    ) -> Result<(RetrievalMetrics, Vec<TestCaseResult>, Option<GenerationMetrics>)> {
        let total = dataset.test_cases.len();
        let mut slots: Vec<Option<TestCaseResult>> = vec![None; total];

        let mut pending = stream::iter(dataset.test_cases.iter().enumerate())
            .map(|(idx, test_case)| async move {
                let result = self
                    .evaluate_case(&dataset.notebook_id, test_case, run.k, run.evaluation_type)
                    .await?;
                Ok::<_, EvalError>((idx, result))
            })
            .buffer_unordered(self.concurrency);

        let mut done = 0;
        while let Some((idx, result)) = pending.try_next().await? {
            slots[idx] = Some(result);
            done += 1;
            debug!(run_id = %run.id, "Evaluated test case {}/{}", done, total);
        }

        let results: Vec<TestCaseResult> = slots.into_iter().flatten().collect();
        if results.len() != total {
            return Err(EvalError::Validation(format!(
                "expected {} results, assembled {}",
                total,
                results.len()
            )));
        }

        let case_metrics: Vec<CaseMetrics> = results.iter().map(|r| r.metrics).collect();
        let metrics = aggregate_retrieval(&case_metrics, run.k)?;

        let generation_metrics = match run.evaluation_type {
            EvaluationType::RetrievalOnly => None,
            EvaluationType::FullRag => {
                let scores: Vec<(f64, f64)> = results
                    .iter()
                    .filter_map(|r| Some((r.faithfulness?, r.answer_relevancy?)))
                    .collect();
                Some(aggregate_generation(&scores)?)
            }
        };

        Ok((metrics, results, generation_metrics))
    }

    async fn evaluate_case(
        &self,
        notebook_id: &str,
        test_case: &TestCase,
        k: usize,
        evaluation_type: EvaluationType,
    ) -> Result<TestCaseResult> {
        let mut retrieved = self
            .search
            .search(&test_case.question, notebook_id, k)
            .await
            .map_err(|e| {
                EvalError::ExternalService(format!(
                    "search failed for test case {}: {}",
                    test_case.id, e
                ))
            })?;
        retrieved.truncate(k);

        let result = TestCaseResult::from_retrieval(test_case, &retrieved, k);
        if evaluation_type == EvaluationType::RetrievalOnly {
            return Ok(result);
        }

        let context: Vec<Chunk> = retrieved.into_iter().map(|r| r.chunk).collect();
        let answer = self.generate_answer(test_case, &context).await?;

        let (faithfulness, relevancy) = tokio::join!(
            self.judge
                .score_faithfulness(&test_case.question, &answer, &context),
            self.judge
                .score_answer_relevancy(&test_case.question, &answer),
        );
        let judge_failures = u8::from(faithfulness.failed) + u8::from(relevancy.failed);

        Ok(result.with_generation(
            answer,
            faithfulness.score,
            relevancy.score,
            judge_failures,
        ))
    }

    /// Grounded answer citing the numbered context.
    async fn generate_answer(&self, test_case: &TestCase, context: &[Chunk]) -> Result<String> {
        let numbered = Prompts::number_context(context.iter().map(|c| c.text.as_str()));
        let prompt = Prompts::rag_answer()
            .replace("{question}", &test_case.question)
            .replace("{context}", &numbered);

        let answer = self
            .llm
            .complete(Some(Prompts::rag_answer_system()), &prompt, &self.answer_model)
            .await
            .map_err(|e| {
                EvalError::ExternalService(format!(
                    "answer generation failed for test case {}: {}",
                    test_case.id, e
                ))
            })?;
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::model::{DatasetStatus, Difficulty, RunStatus};
    use crate::search::RetrievedChunk;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Returns a fixed ranking per question, with a per-question delay so
    /// completions arrive out of order.
    struct ScriptedSearch {
        rankings: HashMap<String, Vec<&'static str>>,
        fail: bool,
    }

    #[async_trait]
    impl VectorSearch for ScriptedSearch {
        async fn search(&self, query: &str, _: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
            if self.fail {
                return Err(EvalError::ExternalService("index offline".into()));
            }
            let ranking = self.rankings.get(query).cloned().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(10 * (5 - ranking.len().min(5)) as u64)).await;
            Ok(ranking
                .into_iter()
                .take(k + 2)
                .enumerate()
                .map(|(i, id)| RetrievedChunk {
                    chunk: Chunk::new(id, format!("text of {}", id)),
                    score: 1.0 - i as f32 * 0.1,
                })
                .collect())
        }
    }

    /// Answers, then judges; the judge reply is configurable.
    struct ScriptedLlm {
        judge_reply: &'static str,
    }

    #[async_trait]
    impl CompletionModel for ScriptedLlm {
        async fn complete(&self, system: Option<&str>, _: &str, model: &str) -> Result<String> {
            if system == Some(Prompts::rag_answer_system()) {
                assert_eq!(model, "answer-model");
                Ok("  Ownership frees memory deterministically [1].  ".to_string())
            } else {
                assert_eq!(model, "judge-model");
                Ok(self.judge_reply.to_string())
            }
        }
    }

    fn dataset() -> EvaluationDataset {
        let cases = vec![
            TestCase::from_chunk("q-first", "A", Some(Difficulty::Factual)),
            TestCase::from_chunk("q-second", "B", None),
            TestCase::from_chunk("q-miss", "Z", Some(Difficulty::Analytical)),
        ];
        EvaluationDataset::create("nb", "ds", 1, 10)
            .unwrap()
            .mark_generating()
            .unwrap()
            .mark_completed(cases)
            .unwrap()
    }

    fn search(fail: bool) -> Arc<ScriptedSearch> {
        let mut rankings = HashMap::new();
        rankings.insert("q-first".to_string(), vec!["A"]);
        rankings.insert("q-second".to_string(), vec!["X", "B", "C", "D", "E"]);
        rankings.insert("q-miss".to_string(), vec!["C", "D"]);
        Arc::new(ScriptedSearch { rankings, fail })
    }

    fn executor(
        store: Arc<MemoryStore>,
        fail_search: bool,
        judge_reply: &'static str,
    ) -> RunExecutor {
        let llm: Arc<dyn CompletionModel> = Arc::new(ScriptedLlm { judge_reply });
        RunExecutor::new(
            store,
            search(fail_search),
            llm.clone(),
            LlmJudge::new(llm, "judge-model"),
            "answer-model",
            3,
        )
    }

    async fn stored_pending_run(
        store: &MemoryStore,
        ds: &EvaluationDataset,
        k: usize,
        kind: EvaluationType,
    ) -> EvaluationRun {
        let run = EvaluationRun::create(ds.id.clone(), k, kind).unwrap();
        store.insert_run(&run).await.unwrap();
        run
    }

    #[tokio::test]
    async fn test_retrieval_only_run() {
        let store = Arc::new(MemoryStore::new());
        let ds = dataset();
        let run = stored_pending_run(&store, &ds, 5, EvaluationType::RetrievalOnly).await;
        let done = executor(store.clone(), false, "{}")
            .execute(&ds, &run)
            .await
            .unwrap();

        assert_eq!(done.status, RunStatus::Completed);
        let ids: Vec<_> = done.results.iter().map(|r| r.test_case_id.clone()).collect();
        let expected: Vec<_> = ds.test_cases.iter().map(|tc| tc.id.clone()).collect();
        assert_eq!(ids, expected);

        let metrics = done.metrics.unwrap();
        assert_eq!(metrics.k, 5);
        assert!((metrics.mrr - 0.5).abs() < 1e-9);
        assert!((metrics.hit_rate_at_k - 2.0 / 3.0).abs() < 1e-9);
        assert!(done.generation_metrics.is_none());
        assert!(done.results.iter().all(|r| !r.has_generation()));

        let stored = store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored, done);
    }

    #[tokio::test]
    async fn test_results_truncated_to_k() {
        let store = Arc::new(MemoryStore::new());
        let ds = dataset();
        let run = stored_pending_run(&store, &ds, 2, EvaluationType::RetrievalOnly).await;
        let done = executor(store, false, "{}").execute(&ds, &run).await.unwrap();
        assert!(done.results.iter().all(|r| r.retrieved_chunk_ids.len() <= 2));
        assert_eq!(done.results[1].retrieved_chunk_ids, vec!["X", "B"]);
        assert_eq!(done.results[1].retrieved_scores.len(), 2);
    }

    #[tokio::test]
    async fn test_full_rag_run() {
        let store = Arc::new(MemoryStore::new());
        let ds = dataset();
        let run = stored_pending_run(&store, &ds, 5, EvaluationType::FullRag).await;
        let done = executor(store, false, r#"{"score": 0.8, "reasoning": "fine"}"#)
            .execute(&ds, &run)
            .await
            .unwrap();

        assert!(done.results.iter().all(|r| r.has_generation()));
        assert_eq!(
            done.results[0].generated_answer.as_deref(),
            Some("Ownership frees memory deterministically [1].")
        );
        let generation = done.generation_metrics.unwrap();
        assert!((generation.mean_faithfulness - 0.8).abs() < 1e-9);
        assert!((generation.mean_answer_relevancy - 0.8).abs() < 1e-9);
        assert_eq!(done.judge_failures(), 0);
    }

    #[tokio::test]
    async fn test_bad_judge_output_does_not_fail_run() {
        let store = Arc::new(MemoryStore::new());
        let ds = dataset();
        let run = stored_pending_run(&store, &ds, 5, EvaluationType::FullRag).await;
        let done = executor(store, false, "looks good to me")
            .execute(&ds, &run)
            .await
            .unwrap();

        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.results.iter().all(|r| r.faithfulness == Some(0.0)));
        assert_eq!(done.judge_failures(), 6);
        assert_eq!(done.generation_metrics.unwrap().mean_faithfulness, 0.0);
    }

    #[tokio::test]
    async fn test_search_failure_fails_run_without_results() {
        let store = Arc::new(MemoryStore::new());
        let ds = dataset();
        let run = stored_pending_run(&store, &ds, 5, EvaluationType::RetrievalOnly).await;
        let err = executor(store.clone(), true, "{}")
            .execute(&ds, &run)
            .await
            .unwrap_err();
        assert!(err.is_external());

        let stored = store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.results.is_empty());
        assert!(stored.metrics.is_none());
        assert!(stored.error_message.unwrap().contains("index offline"));
    }

    #[tokio::test]
    async fn test_dataset_must_be_completed() {
        let store = Arc::new(MemoryStore::new());
        let ds = EvaluationDataset::create("nb", "ds", 1, 10)
            .unwrap()
            .mark_generating()
            .unwrap();
        assert_eq!(ds.status, DatasetStatus::Generating);
        let run = stored_pending_run(&store, &ds, 5, EvaluationType::RetrievalOnly).await;
        let err = executor(store.clone(), false, "{}")
            .execute(&ds, &run)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::DatasetNotRunnable { .. }));

        let stored = store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_cannot_execute_twice() {
        let store = Arc::new(MemoryStore::new());
        let ds = dataset();
        let run = stored_pending_run(&store, &ds, 5, EvaluationType::RetrievalOnly).await;
        let exec = executor(store, false, "{}");
        exec.execute(&ds, &run).await.unwrap();
        let err = exec.execute(&ds, &run).await.unwrap_err();
        assert!(matches!(err, EvalError::StateConflict(_)));
    }
}
