//! CLI command definitions for redcode-exec.
//!
//! `run` evaluates an agent against one or more risky-code datasets; `exec`
//! runs a single snippet in a fresh sandbox, which is handy for checking the
//! base image.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::agent::LlmAgent;
use crate::config::EvalConfig;
use crate::dataset::risky_dataset_path;
use crate::execution::{CommandDispatcher, DockerClient, SandboxSession};
use crate::pipeline::CaseOrchestrator;
use crate::scoring::{CommandScorer, HeuristicScorer, Scorer};
use crate::sink::JsonFileSink;

/// Red-team evaluation of code agents in disposable Docker sandboxes.
#[derive(Parser)]
#[command(name = "redcode-exec")]
#[command(about = "Evaluate code agents against risky-code datasets in Docker sandboxes")]
#[command(version)]
#[command(
    long_about = "redcode-exec presents every risky-code case to an agent in four framings, runs any code the agent chooses to execute inside a fresh container, and scores the outcome.\n\nExample usage:\n  redcode-exec run --dataset-dir ./dataset --start 1 --end 3 --model gpt-4o-mini --api-base http://localhost:4000"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the evaluation over one or more datasets.
    #[command(alias = "eval")]
    Run(RunArgs),

    /// Execute one snippet in a fresh sandbox and print its output.
    Exec(ExecArgs),
}

/// Sandbox overrides shared by all subcommands.
#[derive(Parser, Debug, Clone, Default)]
pub struct SandboxArgs {
    /// YAML configuration file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Base image for the sandbox containers.
    #[arg(long)]
    pub image: Option<String>,

    /// Per-attempt execution timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Total attempts per command.
    #[arg(long)]
    pub retries: Option<u32>,
}

/// Arguments for `redcode-exec run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Dataset files to evaluate.
    pub datasets: Vec<PathBuf>,

    /// Directory holding `index{N}_30_codes_full.json` files.
    #[arg(long, requires = "start")]
    pub dataset_dir: Option<PathBuf>,

    /// First risky id to evaluate from `--dataset-dir`.
    #[arg(long)]
    pub start: Option<u32>,

    /// Last risky id (inclusive); defaults to `--start`.
    #[arg(long)]
    pub end: Option<u32>,

    /// Model identifier for the agent.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// OpenAI-compatible API base URL.
    #[arg(long)]
    pub api_base: Option<String>,

    /// Output directory for conversation and run logs.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// External scorer command; the heuristic scorer is used when omitted.
    #[arg(long)]
    pub scorer_cmd: Option<String>,

    /// Task label written into run summaries.
    #[arg(long)]
    pub task: Option<String>,

    #[command(flatten)]
    pub sandbox: SandboxArgs,
}

impl RunArgs {
    /// Dataset files named on the command line plus the risky id range.
    pub fn dataset_paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut paths = self.datasets.clone();

        if let (Some(dir), Some(start)) = (&self.dataset_dir, self.start) {
            let end = self.end.unwrap_or(start);
            if end < start {
                anyhow::bail!("--end ({end}) must not be smaller than --start ({start})");
            }
            paths.extend((start..=end).map(|id| risky_dataset_path(dir, id)));
        }

        if paths.is_empty() {
            anyhow::bail!("No datasets given; pass dataset files or --dataset-dir with --start");
        }
        Ok(paths)
    }
}

/// Arguments for `redcode-exec exec`.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Language of the snippet (bash, python, c, c++).
    #[arg(short = 'L', long, default_value = "python")]
    pub language: String,

    /// Source code to run; read from `--file` when omitted.
    pub code: Option<String>,

    /// File holding the source code.
    #[arg(short, long, conflicts_with = "code")]
    pub file: Option<PathBuf>,

    #[command(flatten)]
    pub sandbox: SandboxArgs,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_eval_command(args).await,
        Commands::Exec(args) => run_exec_command(args).await,
    }
}

/// Layers config file, environment and sandbox flags.
fn load_config(args: &SandboxArgs) -> anyhow::Result<EvalConfig> {
    let mut config = match &args.config {
        Some(path) => EvalConfig::from_yaml_file(path)?,
        None => EvalConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;

    if let Some(image) = &args.image {
        config.image = image.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    Ok(config)
}

fn build_scorer(config: &EvalConfig) -> anyhow::Result<Arc<dyn Scorer>> {
    match config.scorer_command.as_deref() {
        Some(command) => {
            let scorer = CommandScorer::from_command_line(command)
                .ok_or_else(|| anyhow::anyhow!("Scorer command is empty"))?
                .with_timeout(Duration::from_secs(config.scorer_timeout_secs));
            Ok(Arc::new(scorer))
        }
        None => {
            warn!("No scorer command configured, using heuristic labels");
            Ok(Arc::new(HeuristicScorer::new()))
        }
    }
}

async fn run_eval_command(args: RunArgs) -> anyhow::Result<()> {
    let datasets = args.dataset_paths()?;

    let mut config = load_config(&args.sandbox)?;
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(api_base) = args.api_base {
        config.api_base = Some(api_base);
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(command) = args.scorer_cmd {
        config.scorer_command = Some(command);
    }
    if let Some(task) = args.task {
        config.task = task;
    }
    config.validate()?;

    let runtime = Arc::new(DockerClient::new()?);
    let agent = Arc::new(LlmAgent::from_config(config.agent_config())?);
    let scorer = build_scorer(&config)?;
    let sink = Arc::new(JsonFileSink::new(&config.output_dir));

    let orchestrator = CaseOrchestrator::new(runtime, config.sandbox_config(), agent, scorer, sink)
        .with_task(&config.task);

    info!(
        datasets = datasets.len(),
        model = %config.model,
        image = %config.image,
        output = %config.output_dir.display(),
        "Starting evaluation"
    );

    for path in datasets {
        info!(dataset = %path.display(), "Current running dataset");
        let summary = orchestrator.run_path(&path).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

async fn run_exec_command(args: ExecArgs) -> anyhow::Result<()> {
    let code = match (args.code, &args.file) {
        (Some(code), _) => code,
        (None, Some(file)) => std::fs::read_to_string(file)?,
        (None, None) => anyhow::bail!("Pass the code as an argument or with --file"),
    };

    let config = load_config(&args.sandbox)?;
    config.validate()?;

    let runtime = Arc::new(DockerClient::new()?);
    let language = args.language;
    let result = SandboxSession::scoped(runtime, config.sandbox_config(), |session| async move {
        CommandDispatcher::new(session).dispatch(&language, &code).await
    })
    .await??;

    info!(
        status = %result.status,
        attempts = result.attempts,
        exit_code = ?result.exit_code,
        "Execution finished"
    );
    print!("{}", result.output);
    Ok(())
}
