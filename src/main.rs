//! RAG evaluator CLI
//!
//! Generates synthetic test datasets from a notebook corpus, runs retrieval
//! and full RAG evaluations against them and compares runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rag_evaluator::{
    config::Config,
    corpus::Corpus,
    eval::{EvaluationService, EvaluationType, GenerateDataset, RunEvaluation},
    llm::LlmClient,
    search::KeywordSearcher,
    store::{EvalRepository, FileStore, SaveFormat},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// RAG evaluator - synthetic test generation and retrieval evaluation
#[derive(Parser)]
#[command(name = "rag-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Corpus file with notebooks, documents and chunks
    #[arg(long, global = true, default_value = "data/corpus.json")]
    corpus: PathBuf,

    /// Directory datasets and runs are stored in (overrides config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Storage encoding
    #[arg(long, global = true, value_enum, default_value_t = StoreFormat::Json)]
    format: StoreFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreFormat {
    Json,
    Bincode,
}

impl From<StoreFormat> for SaveFormat {
    fn from(format: StoreFormat) -> Self {
        match format {
            StoreFormat::Json => SaveFormat::Json,
            StoreFormat::Bincode => SaveFormat::Bincode,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic test dataset for a notebook
    Generate {
        /// Notebook to sample chunks from
        notebook: String,

        /// Dataset name
        #[arg(short, long)]
        name: String,

        /// Questions requested per sampled chunk (config default if omitted)
        #[arg(short, long = "questions")]
        questions_per_chunk: Option<usize>,

        /// Maximum chunks to sample (config default if omitted)
        #[arg(short, long)]
        max_chunks: Option<usize>,

        /// Seed for reproducible chunk sampling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List the datasets of a notebook
    Datasets {
        notebook: String,
    },

    /// Show a dataset and its test cases
    Dataset {
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a completed dataset
    Run {
        /// Dataset to evaluate
        dataset: String,

        /// Retrieval cutoff (config default if omitted)
        #[arg(short)]
        k: Option<usize>,

        /// retrieval_only or full_rag
        #[arg(long = "type", default_value = "retrieval_only")]
        evaluation_type: EvaluationType,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the runs of a dataset
    Runs {
        dataset: String,
    },

    /// Show a run with per-case results
    ShowRun {
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare completed runs of the same dataset
    Compare {
        /// Run ids, 2 to 10
        #[arg(required = true, num_args = 2..)]
        runs: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Test LLM connection
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rag_evaluator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Cli {
        corpus,
        data_dir,
        format,
        command,
    } = cli;

    match command {
        Commands::Generate {
            notebook,
            name,
            questions_per_chunk,
            max_chunks,
            seed,
        } => {
            let config = load_config(data_dir)?;
            config.validate().context("Invalid configuration")?;
            let service = open_service(&corpus, format, &config).await?;
            let cmd = GenerateDataset {
                notebook_id: notebook,
                name,
                questions_per_chunk: questions_per_chunk.unwrap_or(config.eval.questions_per_chunk),
                max_chunks_sample: max_chunks.unwrap_or(config.eval.max_chunks_sample),
                seed,
            };
            cmd_generate(&service, cmd).await
        }
        Commands::Datasets { notebook } => {
            let config = load_config(data_dir)?;
            let service = open_service(&corpus, format, &config).await?;
            cmd_datasets(&service, &notebook).await
        }
        Commands::Dataset { id, json } => {
            let config = load_config(data_dir)?;
            let service = open_service(&corpus, format, &config).await?;
            cmd_dataset(&service, &id, json).await
        }
        Commands::Run {
            dataset,
            k,
            evaluation_type,
            json,
        } => {
            let config = load_config(data_dir)?;
            if evaluation_type == EvaluationType::FullRag {
                config.validate().context("Invalid configuration")?;
            }
            let service = open_service(&corpus, format, &config).await?;
            let cmd = RunEvaluation {
                dataset_id: dataset,
                k: k.unwrap_or(config.eval.default_k),
                evaluation_type,
            };
            cmd_run(&service, cmd, json).await
        }
        Commands::Runs { dataset } => {
            let config = load_config(data_dir)?;
            let service = open_service(&corpus, format, &config).await?;
            cmd_runs(&service, &dataset).await
        }
        Commands::ShowRun { id, json } => {
            let config = load_config(data_dir)?;
            let service = open_service(&corpus, format, &config).await?;
            cmd_show_run(&service, &id, json).await
        }
        Commands::Compare { runs, json } => {
            let config = load_config(data_dir)?;
            let service = open_service(&corpus, format, &config).await?;
            cmd_compare(&service, &runs, json).await
        }
        Commands::Test => cmd_test().await,
    }
}

/// Configuration with the `--data-dir` override applied.
fn load_config(data_dir: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(dir) = data_dir {
        config.storage.data_dir = dir;
    }
    config.validate_eval().context("Invalid configuration")?;
    Ok(config)
}

/// Wire the service over the corpus file and the on-disk store, then fail
/// anything a previous process left unfinished.
async fn open_service(
    corpus_path: &Path,
    format: StoreFormat,
    config: &Config,
) -> Result<EvaluationService> {
    let corpus = Arc::new(
        Corpus::load_json(corpus_path)
            .with_context(|| format!("Failed to load corpus '{}'", corpus_path.display()))?,
    );
    let store: Arc<dyn EvalRepository> = Arc::new(
        FileStore::open(&config.storage.data_dir, format.into())
            .context("Failed to open data directory")?,
    );

    let service = EvaluationService::new(
        store,
        corpus.clone(),
        Arc::new(KeywordSearcher::new(corpus)),
        Arc::new(LlmClient::new(config.llm.clone())),
        &config.llm,
        &config.eval,
    );

    let recovered = service
        .fail_interrupted()
        .await
        .context("Failed to recover interrupted work")?;
    if recovered.datasets + recovered.runs > 0 {
        println!(
            "Marked {} dataset(s) and {} run(s) from an earlier session as failed.",
            recovered.datasets, recovered.runs
        );
    }

    Ok(service)
}

async fn cmd_generate(service: &EvaluationService, cmd: GenerateDataset) -> Result<()> {
    println!(
        "Generating dataset '{}' for notebook {} ({} questions/chunk, up to {} chunks)...",
        cmd.name, cmd.notebook_id, cmd.questions_per_chunk, cmd.max_chunks_sample
    );

    let start = Instant::now();
    let summary = service
        .create_dataset(cmd)
        .await
        .context("Dataset generation failed")?;

    summary.print_summary();
    println!("Generated in {:.2?}", start.elapsed());
    Ok(())
}

async fn cmd_datasets(service: &EvaluationService, notebook_id: &str) -> Result<()> {
    let datasets = service
        .list_datasets(notebook_id)
        .await
        .context("Failed to list datasets")?;

    if datasets.is_empty() {
        println!("No datasets for notebook {}.", notebook_id);
        return Ok(());
    }

    println!("Datasets for notebook {}:", notebook_id);
    println!("{}", "─".repeat(80));
    for dataset in &datasets {
        println!("{}", dataset.row());
    }
    Ok(())
}

async fn cmd_dataset(service: &EvaluationService, dataset_id: &str, json: bool) -> Result<()> {
    let detail = service
        .get_dataset(dataset_id)
        .await
        .context("Failed to load dataset")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&detail).context("Failed to serialize dataset")?
        );
    } else {
        detail.print_summary();
    }
    Ok(())
}

async fn cmd_run(service: &EvaluationService, cmd: RunEvaluation, json: bool) -> Result<()> {
    if !json {
        println!(
            "Evaluating dataset {} ({}, k = {})...",
            cmd.dataset_id, cmd.evaluation_type, cmd.k
        );
    }

    let start = Instant::now();
    let detail = service
        .run_evaluation(cmd)
        .await
        .context("Evaluation run failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&detail).context("Failed to serialize run")?
        );
    } else {
        detail.print_summary();
        println!("Evaluated in {:.2?}", start.elapsed());
    }
    Ok(())
}

async fn cmd_runs(service: &EvaluationService, dataset_id: &str) -> Result<()> {
    let runs = service
        .list_runs(dataset_id)
        .await
        .context("Failed to list runs")?;

    if runs.is_empty() {
        println!("No runs for dataset {}.", dataset_id);
        return Ok(());
    }

    println!("Runs for dataset {}:", dataset_id);
    println!("{}", "─".repeat(80));
    for run in &runs {
        println!("{}", run.row());
    }
    Ok(())
}

async fn cmd_show_run(service: &EvaluationService, run_id: &str, json: bool) -> Result<()> {
    let detail = service.get_run(run_id).await.context("Failed to load run")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&detail).context("Failed to serialize run")?
        );
        return Ok(());
    }

    detail.print_summary();
    for (i, result) in detail.results.iter().enumerate() {
        println!(
            "{:>3}. {} hit={} rr={:.3} retrieved=[{}]",
            i + 1,
            result.test_case_id,
            result.metrics.hit,
            result.metrics.reciprocal_rank,
            result.retrieved_chunk_ids.join(", ")
        );
        if let Some(answer) = &result.generated_answer {
            let preview: String = answer.chars().take(120).collect();
            println!("     Answer: {}", preview);
        }
    }
    Ok(())
}

async fn cmd_compare(service: &EvaluationService, run_ids: &[String], json: bool) -> Result<()> {
    let comparison = service
        .compare_runs(run_ids)
        .await
        .context("Comparison failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&comparison).context("Failed to serialize comparison")?
        );
    } else {
        comparison.print_summary();
    }
    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("Testing LLM connection...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  API Base:    {}", config.llm.api_base);
    println!("  Model:       {}", config.llm.model);
    println!("  Eval model:  {}", config.llm.eval_model);
    println!(
        "  API Key:     {}...",
        config.llm.api_key.chars().take(8).collect::<String>()
    );
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(config.llm);

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}
