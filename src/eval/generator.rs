//! Synthetic test generation from notebook chunks.
//!
//! Chunks are sampled without replacement, and each sampled chunk gets one
//! LLM call asking for `questions_per_chunk` questions labelled by
//! difficulty. Every parsed question becomes a [`TestCase`] whose only
//! ground truth is the chunk it came from.
//!
//! Generation is all-or-nothing: an LLM failure on any chunk fails the whole
//! batch, and nothing is returned until every chunk has been answered.
//! Individual malformed questions are dropped with a warning.

use super::model::{Difficulty, TestCase};
use crate::corpus::Chunk;
use crate::error::{EvalError, Result};
use crate::llm::{CompletionModel, Prompts, extract_json};
use futures::{StreamExt, TryStreamExt, stream};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters of one generation pass.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub questions_per_chunk: usize,
    pub max_chunks_sample: usize,
    /// Fixes chunk sampling for reproducible datasets.
    pub seed: Option<u64>,
}

/// Generates labelled questions with the evaluation model.
pub struct SyntheticTestGenerator {
    llm: Arc<dyn CompletionModel>,
    model: String,
    concurrency: usize,
}

impl SyntheticTestGenerator {
    pub fn new(llm: Arc<dyn CompletionModel>, model: impl Into<String>, concurrency: usize) -> Self {
        Self {
            llm,
            model: model.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Generate test cases from `chunks`.
    ///
    /// Returns `NoEligibleContent` when `chunks` is empty and a validation
    /// error when the model produced no usable question at all.
    pub async fn generate_test_cases(
        &self,
        chunks: &[Chunk],
        params: GenerationParams,
    ) -> Result<Vec<TestCase>> {
        if chunks.is_empty() {
            return Err(EvalError::NoEligibleContent(
                "notebook has no chunks from completed documents".to_string(),
            ));
        }

        let sampled = sample_chunks(chunks, params.max_chunks_sample, params.seed);
        info!(
            "Generating {} questions for each of {} sampled chunks ({} available)",
            params.questions_per_chunk,
            sampled.len(),
            chunks.len()
        );

        let mut slots: Vec<Option<Vec<(String, Option<Difficulty>)>>> = vec![None; sampled.len()];
        let mut pending = stream::iter(sampled.iter().enumerate())
            .map(|(idx, chunk)| async move {
                let questions = self.generate_questions(chunk, params.questions_per_chunk).await?;
                Ok::<_, EvalError>((idx, questions))
            })
            .buffer_unordered(self.concurrency);

        while let Some((idx, questions)) = pending.try_next().await? {
            slots[idx] = Some(questions);
        }

        let test_cases: Vec<TestCase> = sampled
            .iter()
            .zip(slots)
            .flat_map(|(chunk, questions)| {
                questions
                    .unwrap_or_default()
                    .into_iter()
                    .map(move |(text, difficulty)| TestCase::from_chunk(text, &chunk.id, difficulty))
            })
            .collect();

        if test_cases.is_empty() {
            return Err(EvalError::Validation(
                "the model did not produce any usable question".to_string(),
            ));
        }

        info!("Generated {} test cases", test_cases.len());
        Ok(test_cases)
    }

    /// One LLM call for `chunk`. Transport errors propagate.
    async fn generate_questions(
        &self,
        chunk: &Chunk,
        count: usize,
    ) -> Result<Vec<(String, Option<Difficulty>)>> {
        let prompt = Prompts::generate_questions()
            .replace("{count}", &count.to_string())
            .replace("{content}", &chunk.text);

        let response = self
            .llm
            .complete(Some(Prompts::question_generator_system()), &prompt, &self.model)
            .await
            .map_err(|e| {
                EvalError::ExternalService(format!(
                    "question generation failed for chunk {}: {}",
                    chunk.id, e
                ))
            })?;

        let questions = parse_questions(&response);
        debug!(chunk_id = %chunk.id, parsed = questions.len(), "Parsed generated questions");
        Ok(questions)
    }
}

/// Uniform sample of `min(max_sample, chunks.len())` chunks without replacement.
///
/// Returns every chunk, in source order, when no sampling is needed.
pub fn sample_chunks(chunks: &[Chunk], max_sample: usize, seed: Option<u64>) -> Vec<Chunk> {
    if chunks.len() <= max_sample {
        return chunks.to_vec();
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    chunks
        .choose_multiple(&mut rng, max_sample)
        .cloned()
        .collect()
}

/// Parse `{"questions": [...]}` into `(text, difficulty)` pairs.
///
/// Items may be objects with `text` and `difficulty`, or bare strings
/// (no difficulty). Blank or malformed items are dropped. An unparseable
/// response yields no questions.
pub(crate) fn parse_questions(response: &str) -> Vec<(String, Option<Difficulty>)> {
    let value: Value = match serde_json::from_str(&extract_json(response)) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Failed to parse generated questions as JSON");
            return Vec::new();
        }
    };

    let Some(items) = value.get("questions").and_then(Value::as_array) else {
        warn!("Generated questions response has no \"questions\" array");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) if !text.trim().is_empty() => Some((text.clone(), None)),
            Value::Object(fields) => {
                let text = fields.get("text").and_then(Value::as_str).unwrap_or("");
                if text.trim().is_empty() {
                    warn!("Dropping generated question without text");
                    return None;
                }
                let difficulty = fields
                    .get("difficulty")
                    .and_then(Value::as_str)
                    .and_then(|label| {
                        let parsed = Difficulty::parse(label);
                        if parsed.is_none() {
                            warn!(label, "Unknown difficulty, leaving question unclassified");
                        }
                        parsed
                    });
                Some((text.to_string(), difficulty))
            }
            other => {
                warn!(item = %other, "Dropping malformed generated question");
                None
            }
        })
        .collect()
}
