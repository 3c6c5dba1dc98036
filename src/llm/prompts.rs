//! LLM prompts for question generation, answering and judging.

/// Collection of prompts used by the evaluation engine.
pub struct Prompts;

impl Prompts {
    /// System prompt for synthetic question generation.
    pub fn question_generator_system() -> &'static str {
        r#"You are a test data generator for a retrieval evaluation system.
Your task is to generate diverse, realistic questions that can be answered from the given passage.

Rules:
- Questions must be self-contained (do not reference "the passage", "the text", "the above", etc.)
- Do not generate yes/no questions
- Generate diverse question types and classify each by difficulty
- Questions should require information specifically from the passage to answer
- Return valid JSON only

Difficulty classifications:
- factual: Direct information recall from the passage
- analytical: Requires analyzing or comparing several facts from the passage
- inferential: Requires drawing conclusions beyond the explicit text
- paraphrased: A semantically equivalent rewording of passage content"#
    }

    /// Prompt asking for `{count}` questions about `{content}`.
    pub fn generate_questions() -> &'static str {
        r#"Based on the following passage, generate exactly {count} questions that can be answered using the information in this passage.

Passage:
{content}

Return your response as a JSON object with this exact format:
{"questions": [{"text": "question 1", "difficulty": "factual"}, ...]}

Valid difficulty values: factual, analytical, inferential, paraphrased"#
    }

    /// System prompt for grounded answer generation.
    pub fn rag_answer_system() -> &'static str {
        r#"You are a helpful research assistant that answers questions based ONLY on the provided source materials.

Rules:
1. Answer ONLY using information from the provided sources
2. Every factual claim must cite its source in the format [1], [2], etc.
3. If the answer is not in the sources, say "I cannot find this information in the provided sources."
4. Do not use your training knowledge
5. Be concise and direct"#
    }

    /// Prompt with `{question}` and numbered `{context}` sources.
    pub fn rag_answer() -> &'static str {
        r#"Based on the following sources, answer this question: {question}

SOURCES:
{context}

Remember: cite [1], [2], etc. for every factual claim. If the information is not in the sources, say so."#
    }

    /// System prompt for the faithfulness judge.
    pub fn faithfulness_system() -> &'static str {
        r#"You are an evaluation agent that assesses whether a generated answer is grounded in the provided context chunks.

Score faithfulness on a scale of 0.0 to 1.0:
- 1.0: Every claim in the answer is supported by the context, no hallucinations
- 0.5: Answer is partially grounded, contains some unsupported claims
- 0.0: Answer contradicts the context or is entirely hallucinated

Return only valid JSON: {"score": <float>, "reasoning": "<brief explanation>"}"#
    }

    /// Faithfulness judge prompt with `{question}`, `{answer}`, `{context}`.
    pub fn faithfulness() -> &'static str {
        r#"Question: {question}

Generated Answer: {answer}

Context Chunks:
{context}

Score the faithfulness of the answer based on the context."#
    }

    /// System prompt for the answer relevancy judge.
    pub fn relevancy_system() -> &'static str {
        r#"You are an evaluation agent that assesses whether a generated answer is relevant to the question.

Score answer relevancy on a scale of 0.0 to 1.0:
- 1.0: Answer directly and completely addresses the question
- 0.5: Answer is partially relevant but incomplete or tangential
- 0.0: Answer does not address the question

Return only valid JSON: {"score": <float>, "reasoning": "<brief explanation>"}"#
    }

    /// Relevancy judge prompt with `{question}` and `{answer}`.
    pub fn relevancy() -> &'static str {
        r#"Question: {question}

Generated Answer: {answer}

Score the relevancy of the answer to the question."#
    }

    /// Number context passages `[1] ...`, separated by blank lines.
    pub fn number_context<'a>(passages: impl IntoIterator<Item = &'a str>) -> String {
        passages
            .into_iter()
            .enumerate()
            .map(|(i, text)| format!("[{}] {}", i + 1, text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_have_placeholders() {
        assert!(Prompts::generate_questions().contains("{count}"));
        assert!(Prompts::generate_questions().contains("{content}"));
        assert!(Prompts::rag_answer().contains("{question}"));
        assert!(Prompts::rag_answer().contains("{context}"));
        assert!(Prompts::faithfulness().contains("{context}"));
        assert!(!Prompts::relevancy().contains("{context}"));
    }

    #[test]
    fn test_generator_prompt_defines_every_difficulty() {
        let system = Prompts::question_generator_system();
        for label in ["factual", "analytical", "inferential", "paraphrased"] {
            assert!(system.contains(&format!("- {}:", label)));
        }
    }

    #[test]
    fn test_number_context() {
        let numbered = Prompts::number_context(["alpha", "beta"]);
        assert_eq!(numbered, "[1] alpha\n\n[2] beta");
    }
}
