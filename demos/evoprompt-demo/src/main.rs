//! evoprompt demo - run an optimization loop from the command line
//!
//! # Usage
//!
//! ```bash
//! # Offline, against the scripted mock provider
//! evoprompt-demo --mock --generations 5
//!
//! # Against an OpenAI-compatible endpoint, stopping on a plateau
//! OPENAI_API_KEY=sk-... evoprompt-demo --threshold 0.9 \
//!     --prompt "Write a product description." \
//!     --input "A waterproof hiking boot" --input "A solar phone charger"
//!
//! # Keep every output in SQLite
//! evoprompt-demo --mock --db "sqlite:runs.db?mode=rwc"
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use evoprompt_core::PromptRecord;
use evoprompt_llm::{
    LlmConfig, LlmProvider, MockProvider, OpenAICompatibleProvider, RetryingProvider,
};
use evoprompt_persist::{AnnotationStore, PromptType, SqliteAnnotationStore};
use evoprompt_runtime::{
    population_from_store, EvaluatorConfig, GeneratorConfig, LlmEvaluator, LlmGenerator,
    LlmOptimizer, LoopConfig, LoopOutcome, OptimizationLoop, OptimizerConfig,
};

const DEFAULT_PROMPTS: [&str; 2] = [
    "Write a short product description for the item below.",
    "You are a copywriter. Describe the product below in two punchy sentences.",
];

const DEFAULT_INPUT: &str = "A stainless steel water bottle that keeps drinks cold for 24 hours";

/// Evolve prompts with LLM feedback
#[derive(Parser)]
#[command(name = "evoprompt-demo", version, about = "Feedback-driven prompt optimization")]
struct Cli {
    /// Generation budget
    #[arg(short, long, default_value_t = 5)]
    generations: u32,

    /// Stop once convergence reaches this value (0, 1]
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Maximum concurrent LLM calls per phase
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Input payload; repeat to rotate inputs across generations
    #[arg(short, long = "input")]
    inputs: Vec<String>,

    /// Seed prompt; repeat for a larger population
    #[arg(short, long = "prompt")]
    prompts: Vec<String>,

    /// Use the offline mock provider even if an API key is set
    #[arg(long)]
    mock: bool,

    /// Also rewrite the evaluator prompt every generation
    #[arg(long)]
    evolve_evaluator: bool,

    /// SQLite URL for storing outputs; seeds resume from its latest generation
    #[arg(long)]
    db: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let llm_config = LlmConfig::from_env().context("invalid LLM configuration")?;

    let store: Option<Arc<dyn AnnotationStore>> = match &cli.db {
        Some(url) => Some(Arc::new(
            SqliteAnnotationStore::new(url)
                .await
                .with_context(|| format!("failed to open {}", url))?,
        )),
        None => None,
    };

    let population = seed_population(&cli, store.as_deref()).await?;
    let inputs = if cli.inputs.is_empty() {
        vec![DEFAULT_INPUT.to_string()]
    } else {
        cli.inputs.clone()
    };
    tracing::info!(
        population = population.len(),
        inputs = inputs.len(),
        generations = cli.generations,
        "Seeded optimization run"
    );

    let outcome = if cli.mock || !llm_config.is_configured() {
        println!("{} using the offline mock provider", "i".blue().bold());
        let llm = Arc::new(MockProvider::smart());
        run(&cli, llm.clone(), llm.clone(), llm, store, population, &inputs).await?
    } else {
        let api_key = llm_config.require_api_key()?;
        let provider = |model: &str| {
            let inner =
                OpenAICompatibleProvider::new(api_key, model).with_base_url(&llm_config.base_url);
            Arc::new(RetryingProvider::new(inner, llm_config.retry_config()))
        };
        println!(
            "{} using {} ({})",
            "i".blue().bold(),
            llm_config.base_url,
            llm_config.generator_model
        );
        run(
            &cli,
            provider(&llm_config.generator_model),
            provider(&llm_config.evaluator_model),
            provider(&llm_config.optimizer_model),
            store,
            population,
            &inputs,
        )
        .await?
    };

    print_outcome(&outcome)?;
    Ok(())
}

/// Seeds from `--prompt`, else from the store, else the built-in prompts
async fn seed_population(
    cli: &Cli,
    store: Option<&dyn AnnotationStore>,
) -> Result<Vec<PromptRecord>> {
    if !cli.prompts.is_empty() {
        return Ok(cli.prompts.iter().map(|p| PromptRecord::new(p)).collect());
    }
    if let Some(store) = store {
        let resumed = population_from_store(store, PromptType::Generator)
            .await
            .context("failed to load stored prompts")?;
        if !resumed.is_empty() {
            println!(
                "{} resuming {} prompt(s) from generation {}",
                "i".blue().bold(),
                resumed.len(),
                resumed[0].generation()
            );
            return Ok(resumed);
        }
    }
    Ok(DEFAULT_PROMPTS.iter().map(|p| PromptRecord::new(p)).collect())
}

async fn run<L: LlmProvider + 'static>(
    cli: &Cli,
    generator_llm: Arc<L>,
    evaluator_llm: Arc<L>,
    optimizer_llm: Arc<L>,
    store: Option<Arc<dyn AnnotationStore>>,
    population: Vec<PromptRecord>,
    inputs: &[String],
) -> Result<LoopOutcome> {
    let start_generation = population.iter().map(|p| p.generation()).max().unwrap_or(0);
    let config = LoopConfig {
        max_generations: cli.generations,
        convergence_threshold: cli.threshold,
        concurrency: cli.concurrency,
        start_generation,
        evolve_evaluator_prompt: cli.evolve_evaluator,
    };

    let mut optimization = OptimizationLoop::new(
        LlmGenerator::new(generator_llm, GeneratorConfig::default()),
        LlmEvaluator::new(evaluator_llm, EvaluatorConfig::default()),
        LlmOptimizer::new(optimizer_llm, OptimizerConfig::default()),
        config,
    );
    if let Some(store) = store {
        optimization = optimization.with_store(store);
    }

    Ok(optimization.run(population, inputs).await?)
}

fn print_outcome(outcome: &LoopOutcome) -> Result<()> {
    println!(
        "{} {} generation(s), stopped: {:?}",
        "✓".green().bold(),
        outcome.generations_run,
        outcome.stop_reason
    );

    for (rank, record) in ranked(&outcome.population).into_iter().enumerate() {
        println!(
            "\n{} score {:.2}, generation {}\n{}",
            format!("#{}", rank + 1).cyan().bold(),
            record.score(),
            record.generation(),
            record.content()
        );
    }

    if let Some((id, score)) = outcome.tracker.best_lineage() {
        println!("\n{} lineage {} peaked at {:.2}", "★".yellow(), id, score);
    }

    println!(
        "\n{}",
        serde_json::to_string_pretty(&outcome.tracker.metrics())?
    );
    Ok(())
}

/// Population ordered by score, best first; ties keep population order
fn ranked(population: &[PromptRecord]) -> Vec<&PromptRecord> {
    let mut records: Vec<&PromptRecord> = population.iter().collect();
    records.sort_by(|a, b| b.score().total_cmp(&a.score()));
    records
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}
