//! snipbox - sandboxed snippet execution CLI
//!
//! ## Commands
//!
//! - `run`: Execute one snippet in a fresh environment and print its outcome
//! - `batch`: Execute several snippet files in one environment, in order
//! - `doc-search`: Search local documentation for a phrase
//! - `check-config`: Load and validate the agent configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snipbox_core::{
    evaluate_outcome, init_dual_sink, init_tracing, parse_level, search_docs, ExecutionOutcome,
    ExecutorConfig, Orchestrator, DEFAULT_MAX_RESULTS,
};
use snipbox_env::DockerCli;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

/// Name of the executor's log file inside the logs folder.
const AGENT_NAME: &str = "executor";

#[derive(Parser)]
#[command(name = "snipbox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Run code snippets in an isolated container with bounded retries",
    long_about = None
)]
struct Cli {
    /// Enable verbose console output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted console log lines
    #[arg(long, global = true)]
    json: bool,

    /// Agent configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "SNIPBOX_CONFIG",
        default_value = "config/agent_config.toml"
    )]
    config: PathBuf,

    /// Dependency manifest installed into the environment at startup
    #[arg(long, global = true, env = "PROJECT_REQUIREMENTS_TXT")]
    requirements: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single snippet
    Run {
        /// File holding the snippet
        #[arg(short, long, conflicts_with = "code", required_unless_present = "code")]
        file: Option<PathBuf>,

        /// Snippet text given inline
        #[arg(long)]
        code: Option<String>,
    },

    /// Execute snippet files one after another against the same environment
    Batch {
        /// Snippet files, submitted in order (repeats are retries)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Search local documentation
    DocSearch {
        /// Phrase to look for (case-insensitive)
        #[arg(short, long)]
        query: String,

        /// Folder holding .md / .txt documentation
        #[arg(long, default_value = "docs")]
        docs_folder: PathBuf,

        /// Maximum number of matching lines
        #[arg(short, long, default_value_t = DEFAULT_MAX_RESULTS)]
        max_results: usize,
    },

    /// Validate the configuration and print the resolved values
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let console_default = if cli.verbose { Level::DEBUG } else { Level::INFO };

    match cli.command {
        Commands::Run { file, code } => {
            let code = match (file, code) {
                (Some(path), _) => read_snippet(&path)?,
                (None, Some(code)) => code,
                (None, None) => anyhow::bail!("either --file or --code is required"),
            };
            let config = load_config(&cli.config, cli.requirements)?;
            init_logging(&config, cli.verbose, cli.json)?;
            cmd_run(config, &code).await
        }
        Commands::Batch { files } => {
            let config = load_config(&cli.config, cli.requirements)?;
            init_logging(&config, cli.verbose, cli.json)?;
            cmd_batch(config, &files).await
        }
        Commands::DocSearch {
            query,
            docs_folder,
            max_results,
        } => {
            init_tracing(cli.json, console_default);
            cmd_doc_search(&docs_folder, &query, max_results)
        }
        Commands::CheckConfig => {
            init_tracing(cli.json, console_default);
            let config = load_config(&cli.config, cli.requirements)?;
            cmd_check_config(&config)
        }
    }
}

fn load_config(path: &Path, requirements: Option<PathBuf>) -> Result<ExecutorConfig> {
    let mut config = ExecutorConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    if requirements.is_some() {
        config.requirements_path = requirements;
    }
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", path))?;
    Ok(config)
}

/// File sink at `external_log_level`, console at `container_log_level`
/// (or DEBUG with `--verbose`).
fn init_logging(config: &ExecutorConfig, verbose: bool, json: bool) -> Result<()> {
    let file_level = parse_level(&config.external_log_level, Level::DEBUG);
    let console_level = if verbose {
        Level::DEBUG
    } else {
        parse_level(&config.container_log_level, Level::INFO)
    };
    let path = init_dual_sink(&config.logs_folder, AGENT_NAME, file_level, console_level, json)
        .with_context(|| format!("Failed to open log file under {:?}", config.logs_folder))?;
    info!(log_file = %path.display(), "logging initialised");
    Ok(())
}

fn read_snippet(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read snippet {:?}", path))
}

async fn start(config: ExecutorConfig) -> Result<Orchestrator> {
    Orchestrator::new(config, Arc::new(DockerCli::new()))
        .await
        .context("Failed to start execution environment")
}

fn print_outcome(outcome: &ExecutionOutcome) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    let verdict = evaluate_outcome(outcome);
    let label = if verdict.valid { "valid" } else { "invalid" };
    println!("verdict: {} ({})", label, verdict.message);
    Ok(())
}

async fn cmd_run(config: ExecutorConfig, code: &str) -> Result<()> {
    let mut orchestrator = start(config).await?;
    let outcome = orchestrator.submit(code).await;
    orchestrator.teardown().await;
    print_outcome(&outcome)
}

async fn cmd_batch(config: ExecutorConfig, files: &[PathBuf]) -> Result<()> {
    let mut snippets = Vec::with_capacity(files.len());
    for path in files {
        snippets.push((path, read_snippet(path)?));
    }

    let mut orchestrator = start(config).await?;

    let result: Result<()> = tokio::select! {
        res = async {
            for (path, code) in &snippets {
                println!("== {}", path.display());
                let outcome = orchestrator.submit(code).await;
                print_outcome(&outcome)?;
            }
            Ok::<(), anyhow::Error>(())
        } => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, tearing down environment");
            Ok(())
        }
    };

    orchestrator.teardown().await;
    result
}

fn cmd_doc_search(folder: &Path, query: &str, max_results: usize) -> Result<()> {
    let hits = search_docs(folder, query, max_results)
        .with_context(|| format!("Failed to search docs in {:?}", folder))?;
    if hits.is_empty() {
        println!("No documentation found for '{}'", query);
        return Ok(());
    }
    for hit in hits {
        println!("{}", hit);
    }
    Ok(())
}

fn cmd_check_config(config: &ExecutorConfig) -> Result<()> {
    let spec = config.environment_spec();
    println!("Configuration OK");
    println!("  logs folder:        {}", config.logs_folder.display());
    println!("  image:              {}", spec.image);
    println!("  cpu shares:         {}", spec.cpu_shares);
    println!("  memory limit:       {}", spec.memory_limit);
    println!("  gpu:                {}", spec.gpu_enabled);
    println!("  max retries:        {}", config.max_snippet_retries);
    println!("  loop threshold:     {}", config.loop_detection_count);
    if let Some(path) = &config.requirements_path {
        println!("  requirements:       {}", path.display());
    }
    if let Some(secs) = config.exec_timeout_secs {
        println!("  exec timeout:       {}s", secs);
    }
    Ok(())
}
