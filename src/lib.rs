//! RAG Evaluator - synthetic test generation and evaluation for notebook RAG.
//!
//! Measures how well a retrieval-augmented generation system finds the right
//! chunks, and optionally how faithful and relevant its answers are.
//!
//! # Overview
//!
//! 1. Sample chunks from a notebook and ask an LLM for questions each chunk
//!    answers. Every question becomes a test case whose ground truth is its
//!    source chunk.
//! 2. Run a dataset: search every question at cutoff `k` and score the
//!    ranking. Full RAG runs also generate an answer and have an LLM judge
//!    its faithfulness and relevancy.
//! 3. Compare completed runs of one dataset side by side.
//!
//! # Quick Start
//!
//! ```no_run
//! use rag_evaluator::{
//!     config::Config,
//!     corpus::Corpus,
//!     eval::{EvaluationService, EvaluationType, GenerateDataset, RunEvaluation},
//!     llm::LlmClient,
//!     search::KeywordSearcher,
//!     store::{FileStore, SaveFormat},
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     // Corpus and storage
//!     let corpus = Arc::new(Corpus::load_json(Path::new("data/corpus.json"))?);
//!     let store = Arc::new(FileStore::open(&config.storage.data_dir, SaveFormat::Json)?);
//!
//!     let service = EvaluationService::new(
//!         store,
//!         corpus.clone(),
//!         Arc::new(KeywordSearcher::new(corpus)),
//!         Arc::new(LlmClient::new(config.llm.clone())),
//!         &config.llm,
//!         &config.eval,
//!     );
//!
//!     // Generate a dataset
//!     let dataset = service
//!         .create_dataset(GenerateDataset {
//!             notebook_id: "nb1".into(),
//!             name: "baseline".into(),
//!             questions_per_chunk: 2,
//!             max_chunks_sample: 50,
//!             seed: None,
//!         })
//!         .await?;
//!
//!     // Evaluate it
//!     let run = service
//!         .run_evaluation(RunEvaluation {
//!             dataset_id: dataset.id,
//!             k: 5,
//!             evaluation_type: EvaluationType::RetrievalOnly,
//!         })
//!         .await?;
//!
//!     run.print_summary();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **EvaluationService**: Dataset and run lifecycle, listing, comparison
//! - **SyntheticTestGenerator**: Samples chunks and generates questions
//! - **RunExecutor**: Searches, answers and judges each test case
//! - **RunComparator**: Side-by-side comparison of completed runs
//! - **EvalRepository**: Versioned storage (in memory or on disk)
//! - **ChunkSource / VectorSearch / CompletionModel**: Collaborator seams

pub mod config;
pub mod corpus;
pub mod error;
pub mod eval;
pub mod llm;
pub mod search;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use corpus::{Chunk, ChunkSource, Corpus};
pub use error::{ErrorKind, EvalError, Result};
pub use eval::EvaluationService;
pub use llm::{CompletionModel, LlmClient};
pub use search::{KeywordSearcher, RetrievedChunk, VectorSearch};
pub use store::{EvalRepository, FileStore, MemoryStore, SaveFormat};
