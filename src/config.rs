//! Configuration for the evaluation engine.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Largest retrieval cutoff a run may use.
pub const MAX_K: usize = 50;

/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the LLM API (e.g., "https://api.openai.com")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Model used to answer questions in full RAG runs
    pub model: String,

    /// Model used for question generation and judging
    #[serde(default = "default_eval_model")]
    pub eval_model: String,

    /// Maximum tokens for response (optional)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation (optional)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_eval_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.0
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            eval_model: default_eval_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Evaluation defaults and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Maximum number of in-flight LLM/search calls.
    pub concurrency: usize,
    /// Cutoff used when a run does not specify one.
    pub default_k: usize,
    /// Questions requested per sampled chunk.
    pub questions_per_chunk: usize,
    /// Upper bound on chunks sampled per dataset.
    pub max_chunks_sample: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_k: 5,
            questions_per_chunk: 2,
            max_chunks_sample: 50,
        }
    }
}

/// Where datasets and runs are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "rag-evaluator")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("data"));
        Self { data_dir }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// LLM settings
    pub llm: LlmConfig,
    /// Evaluation defaults
    pub eval: EvalConfig,
    /// Persistence settings
    pub storage: StorageConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    eval: Option<EvalFileSection>,
    storage: Option<StorageFileSection>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    eval_model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct EvalFileSection {
    concurrency: Option<usize>,
    default_k: Option<usize>,
    questions_per_chunk: Option<usize>,
    max_chunks_sample: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StorageFileSection {
    data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_API_KEY, LLM_MODEL, EVAL_*)
    /// 2. Config file (~/.config/rag-evaluator/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::load_from_file(&config_path)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }
        if let Ok(api_key) = env::var("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(model) = env::var("LLM_EVAL_MODEL") {
            self.llm.eval_model = model;
        }
        if let Some(tokens) = parse_env("LLM_MAX_TOKENS") {
            self.llm.max_tokens = tokens;
        }
        if let Some(temp) = parse_env("LLM_TEMPERATURE") {
            self.llm.temperature = temp;
        }
        if let Some(concurrency) = parse_env("EVAL_CONCURRENCY") {
            self.eval.concurrency = concurrency;
        }
        if let Some(k) = parse_env("EVAL_DEFAULT_K") {
            self.eval.default_k = k;
        }
        if let Ok(dir) = env::var("EVAL_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, filling gaps with defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(eval_model) = llm.eval_model {
                config.llm.eval_model = eval_model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
        }

        if let Some(eval) = file_config.eval {
            if let Some(concurrency) = eval.concurrency {
                config.eval.concurrency = concurrency;
            }
            if let Some(k) = eval.default_k {
                config.eval.default_k = k;
            }
            if let Some(q) = eval.questions_per_chunk {
                config.eval.questions_per_chunk = q;
            }
            if let Some(m) = eval.max_chunks_sample {
                config.eval.max_chunks_sample = m;
            }
        }

        if let Some(storage) = file_config.storage {
            if let Some(dir) = storage.data_dir {
                config.storage.data_dir = dir;
            }
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "rag-evaluator")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(EvalError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.api_key.is_empty() {
            return Err(EvalError::Config(
                "LLM API key is required. Set LLM_API_KEY environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() || self.llm.eval_model.is_empty() {
            return Err(EvalError::Config(
                "LLM model is required. Set LLM_MODEL / LLM_EVAL_MODEL or add to config file."
                    .to_string(),
            ));
        }

        self.validate_eval()
    }

    /// Validate the evaluation defaults only (no LLM credentials needed).
    pub fn validate_eval(&self) -> Result<()> {
        if self.eval.concurrency == 0 {
            return Err(EvalError::Config(
                "eval.concurrency must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_K).contains(&self.eval.default_k) {
            return Err(EvalError::Config(format!(
                "eval.default_k must be between 1 and {}",
                MAX_K
            )));
        }
        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.llm.api_base.is_empty());
        assert!(config.llm.api_key.is_empty());
        assert_eq!(config.llm.eval_model, "gpt-4o-mini");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.eval.concurrency, 4);
        assert_eq!(config.eval.default_k, 5);
    }

    #[test]
    fn test_validate_fails_without_required_fields() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_llm() {
        let config = Config::with_llm("https://api.example.com", "test-key", "gpt-4");
        assert_eq!(config.llm.api_base, "https://api.example.com");
        assert_eq!(config.llm.api_key, "test-key");
        assert_eq!(config.llm.model, "gpt-4");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial_sections() {
        let yaml = r#"
llm:
  api_base: https://proxy.local
  eval_model: judge-model
eval:
  concurrency: 8
  default_k: 10
storage:
  data_dir: /tmp/evals
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.llm.api_base, "https://proxy.local");
        assert_eq!(config.llm.eval_model, "judge-model");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.eval.concurrency, 8);
        assert_eq!(config.eval.default_k, 10);
        assert_eq!(config.eval.questions_per_chunk, 2);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/evals"));
    }

    #[test]
    fn test_validate_eval_limits() {
        let mut config = Config::with_llm("https://api.example.com", "k", "m");
        config.eval.concurrency = 0;
        assert!(config.validate().is_err());

        config.eval.concurrency = 2;
        config.eval.default_k = 51;
        assert!(config.validate().is_err());
    }
}
