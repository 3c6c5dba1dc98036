//! LLM-as-judge scoring of generated answers.
//!
//! The judge never fails a run: any transport error, unparseable response or
//! non-numeric score degrades to a score of `0.0` with `failed` set, and a
//! warning is logged.

use crate::corpus::Chunk;
use crate::llm::{CompletionModel, Prompts, extract_json};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// A judge verdict in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeScore {
    pub score: f64,
    pub reasoning: Option<String>,
    /// True when the score is the fallback rather than a parsed verdict.
    pub failed: bool,
}

impl JudgeScore {
    fn fallback() -> Self {
        Self {
            score: 0.0,
            reasoning: None,
            failed: true,
        }
    }
}

/// Scores answer faithfulness and relevancy with the evaluation model.
pub struct LlmJudge {
    llm: Arc<dyn CompletionModel>,
    model: String,
}

impl LlmJudge {
    pub fn new(llm: Arc<dyn CompletionModel>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// How well `answer` is grounded in `context`.
    pub async fn score_faithfulness(
        &self,
        question: &str,
        answer: &str,
        context: &[Chunk],
    ) -> JudgeScore {
        let numbered = Prompts::number_context(context.iter().map(|c| c.text.as_str()));
        let prompt = Prompts::faithfulness()
            .replace("{question}", question)
            .replace("{answer}", answer)
            .replace("{context}", &numbered);
        self.score("faithfulness", Prompts::faithfulness_system(), &prompt)
            .await
    }

    /// How directly `answer` addresses `question`.
    pub async fn score_answer_relevancy(&self, question: &str, answer: &str) -> JudgeScore {
        let prompt = Prompts::relevancy()
            .replace("{question}", question)
            .replace("{answer}", answer);
        self.score("answer_relevancy", Prompts::relevancy_system(), &prompt)
            .await
    }

    async fn score(&self, metric: &str, system: &str, prompt: &str) -> JudgeScore {
        let response = match self.llm.complete(Some(system), prompt, &self.model).await {
            Ok(r) => r,
            Err(e) => {
                warn!(metric, error = %e, "Judge call failed, scoring 0.0");
                return JudgeScore::fallback();
            }
        };

        match parse_score(&response) {
            Some((score, reasoning)) => JudgeScore {
                score,
                reasoning,
                failed: false,
            },
            None => {
                warn!(metric, response = %response, "Unparseable judge response, scoring 0.0");
                JudgeScore::fallback()
            }
        }
    }
}

/// Parse `{"score": <number>, "reasoning": "..."}`, clamping the score to `[0, 1]`.
pub(crate) fn parse_score(response: &str) -> Option<(f64, Option<String>)> {
    #[derive(Deserialize)]
    struct RawVerdict {
        score: serde_json::Value,
        #[serde(default)]
        reasoning: Option<String>,
    }

    let raw: RawVerdict = serde_json::from_str(&extract_json(response)).ok()?;
    let score = raw.score.as_f64().filter(|s| s.is_finite())?;
    Some((score.clamp(0.0, 1.0), raw.reasoning))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvalError, Result};
    use async_trait::async_trait;

    struct Canned(std::result::Result<String, String>);

    #[async_trait]
    impl CompletionModel for Canned {
        async fn complete(&self, _: Option<&str>, _: &str, _: &str) -> Result<String> {
            self.0.clone().map_err(EvalError::LlmApi)
        }
    }

    fn judge(response: std::result::Result<&str, &str>) -> LlmJudge {
        let canned = Canned(response.map(String::from).map_err(String::from));
        LlmJudge::new(Arc::new(canned), "judge-model")
    }

    #[test]
    fn test_parse_score() {
        let (score, reasoning) =
            parse_score(r#"{"score": 0.85, "reasoning": "well grounded"}"#).unwrap();
        assert_eq!(score, 0.85);
        assert_eq!(reasoning.as_deref(), Some("well grounded"));
    }

    #[test]
    fn test_parse_score_clamps() {
        assert_eq!(parse_score(r#"{"score": 1.5}"#).unwrap().0, 1.0);
        assert_eq!(parse_score(r#"{"score": -0.3}"#).unwrap().0, 0.0);
        assert_eq!(parse_score(r#"{"score": 1}"#).unwrap().0, 1.0);
    }

    #[test]
    fn test_parse_score_from_fenced_block() {
        let response = "```json\n{\"score\": 0.4, \"reasoning\": \"partial\"}\n```";
        assert_eq!(parse_score(response).unwrap().0, 0.4);
    }

    #[test]
    fn test_parse_score_rejects_non_numeric() {
        assert!(parse_score(r#"{"score": "high"}"#).is_none());
        assert!(parse_score(r#"{"reasoning": "no score"}"#).is_none());
        assert!(parse_score("I think it is fine").is_none());
    }

    #[tokio::test]
    async fn test_faithfulness_uses_parsed_score() {
        let judge = judge(Ok(r#"{"score": 0.9, "reasoning": "ok"}"#));
        let context = vec![Chunk::new("c1", "Rust has no garbage collector.")];
        let verdict = judge
            .score_faithfulness("Does Rust use GC?", "No [1].", &context)
            .await;
        assert_eq!(verdict.score, 0.9);
        assert!(!verdict.failed);
    }

    #[tokio::test]
    async fn test_malformed_response_scores_zero() {
        let judge = judge(Ok("not json at all"));
        let verdict = judge.score_answer_relevancy("q", "a").await;
        assert_eq!(verdict.score, 0.0);
        assert!(verdict.failed);
    }

    #[tokio::test]
    async fn test_llm_error_scores_zero() {
        let judge = judge(Err("timeout"));
        let verdict = judge.score_answer_relevancy("q", "a").await;
        assert_eq!(verdict, JudgeScore::fallback());
    }
}
