//! LLM integration module.
//!
//! Provides the [`CompletionModel`] seam the evaluation engine talks to,
//! an OpenAI-compatible client implementing it, and the prompts used for
//! question generation, answering and judging.

mod client;
mod prompts;

pub use client::{LlmClient, Message, Role};
pub use prompts::Prompts;

use crate::error::Result;
use async_trait::async_trait;

/// Text completion capability.
///
/// `model` selects the model for this call so one client can serve both the
/// answering model and the evaluation model.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, system: Option<&str>, prompt: &str, model: &str) -> Result<String>;
}

/// Extract the JSON payload from a model response.
///
/// Handles fenced code blocks (with or without a language tag) and prose
/// around a single top-level object.
pub fn extract_json(response: &str) -> String {
    let response = response.trim();

    if response.starts_with("```json") {
        if let Some(end) = response.rfind("```") {
            let start = "```json".len();
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if response.starts_with("```") {
        if let Some(end) = response.rfind("```") {
            let start = response.find('\n').map(|n| n + 1).unwrap_or(3);
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return response[start..=end].to_string();
            }
        }
    }

    response.to_string()
}
