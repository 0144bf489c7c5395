//! Research a bundle of related entities and write one report per direction.
//!
//! Reads `OPENROUTER_KEY` (generation) and `BRAVE_SEARCH_KEY` (web search)
//! from the environment.
//!
//! # Examples
//!
//! ```sh
//! # Research every non-empty direction of a bundle
//! dossier run --bundle ep42.json --out research/
//!
//! # Widen the plans and run two directions at once
//! dossier run --bundle ep42.json --high-risk --commercial --concurrency 2
//!
//! # Continue an interrupted run
//! dossier resume --bundle ep42.json --run-id run-18f3a2c4b10-0001
//!
//! # Show the plans a run would use, without calling any service
//! dossier plan --bundle ep42.json
//! ```

use clap::{Args, Parser, Subcommand};
use dossier::prelude::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Resumable bundle research.
#[derive(Parser)]
#[command(name = "dossier", version)]
struct Cli {
    /// Log per-step detail (same as RUST_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Research a bundle under a fresh run id.
    Run(RunArgs),
    /// Continue a run from its checkpoints.
    Resume {
        /// Run id printed when the run started.
        #[arg(long)]
        run_id: String,

        #[command(flatten)]
        args: RunArgs,
    },
    /// Print the compiled plan for each direction and exit.
    Plan(PlanArgs),
}

#[derive(Args)]
struct PlanArgs {
    /// Bundle JSON file.
    #[arg(long)]
    bundle: PathBuf,

    /// Precompiled plans (JSON object keyed by direction) instead of the rule table.
    #[arg(long)]
    plans: Option<PathBuf>,

    /// Add the high-risk fields to every plan.
    #[arg(long)]
    high_risk: bool,

    /// Add the commercial fields to every plan.
    #[arg(long)]
    commercial: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    plan: PlanArgs,

    /// JSON config file (orchestrator, agent and generator settings).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory artifacts are written under.
    #[arg(long, default_value = "research")]
    out: PathBuf,

    /// Directory checkpoints are written under.
    #[arg(long, default_value = ".dossier/checkpoints")]
    checkpoints: PathBuf,

    /// Model for planning and synthesis.
    #[arg(long)]
    model: Option<String>,

    /// Model for compression and history summaries.
    #[arg(long)]
    summary_model: Option<String>,

    /// Directions researched at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Step cap per direction.
    #[arg(long)]
    max_steps: Option<u32>,

    /// Wall-clock budget per direction, in seconds.
    #[arg(long)]
    direction_timeout: Option<u64>,
}

/// Config file layout: orchestrator settings at the top level plus a
/// `generator` section.
#[derive(Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    #[serde(flatten)]
    orchestrator: OrchestratorConfig,
    generator: GeneratorConfig,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> Result<Self, String> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {e}", path.display()))?;
        serde_json::from_str(&json)
            .map_err(|e| format!("Failed to parse config {}: {e}", path.display()))
    }

    /// CLI flags win over file values.
    fn apply(mut self, args: &RunArgs) -> Self {
        if let Some(ref model) = args.model {
            self.generator = self.generator.with_model(model.clone());
        }
        if let Some(ref model) = args.summary_model {
            self.generator = self.generator.with_summary_model(model.clone());
        }
        if let Some(n) = args.concurrency {
            self.orchestrator = self.orchestrator.with_concurrency(n);
        }
        if let Some(steps) = args.max_steps {
            self.orchestrator.agent = self.orchestrator.agent.with_max_steps(steps);
        }
        if let Some(secs) = args.direction_timeout {
            self.orchestrator.agent = self
                .orchestrator
                .agent
                .with_direction_timeout(Duration::from_secs(secs));
        }
        self
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Command::Plan(args) => print_plans(&args),
        Command::Run(args) => research(&args, None).await,
        Command::Resume { run_id, args } => research(&args, Some(run_id)).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_bundle(path: &Path) -> Result<Bundle, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read bundle {}: {e}", path.display()))?;
    serde_json::from_str(&json)
        .map_err(|e| format!("Failed to parse bundle {}: {e}", path.display()))
}

fn plan_source(args: &PlanArgs) -> Result<Arc<dyn PlanSource>, String> {
    match args.plans {
        Some(ref path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read plans {}: {e}", path.display()))?;
            Ok(Arc::new(StaticPlanSource::from_json(&json)?))
        }
        None => Ok(Arc::new(RulePlanSource::new(PlanFlags {
            high_risk: args.high_risk,
            commercial: args.commercial,
        }))),
    }
}

fn print_plans(args: &PlanArgs) -> Result<(), String> {
    let bundle = load_bundle(&args.bundle)?;
    let plans = plan_source(args)?
        .plans(&bundle)
        .map_err(|e| e.to_string())?;
    let plans: Vec<DirectionPlan> = plans.into_iter().map(|(_, plan)| plan).collect();
    let json = serde_json::to_string_pretty(&plans)
        .map_err(|e| format!("Failed to serialize plans: {e}"))?;
    println!("{json}");
    Ok(())
}

async fn research(args: &RunArgs, run_id: Option<String>) -> Result<(), String> {
    let bundle = load_bundle(&args.plan.bundle)?;
    let config = FileConfig::load(args.config.as_deref())?.apply(args);

    let api_key =
        std::env::var("OPENROUTER_KEY").map_err(|_| "OPENROUTER_KEY not set".to_string())?;
    let client = OpenRouterClient::new(api_key)?;
    let generator = Arc::new(OpenRouterGenerator::new(client, config.generator));
    let tools = Arc::new(WebToolProvider::from_env(
        config.orchestrator.agent.tool_timeout(),
    )?);
    if std::env::var("BRAVE_SEARCH_KEY").is_err() {
        warn!("BRAVE_SEARCH_KEY not set; every search action will fail");
    }
    let artifacts = Arc::new(
        FsArtifactStore::new(&args.out)
            .map_err(|e| format!("Failed to open artifact dir {}: {e}", args.out.display()))?,
    );
    let checkpoints = Arc::new(FileCheckpointStore::new(&args.checkpoints).map_err(|e| {
        format!(
            "Failed to open checkpoint dir {}: {e}",
            args.checkpoints.display()
        )
    })?);

    let orchestrator = BundleOrchestrator::new(
        config.orchestrator,
        plan_source(&args.plan)?,
        generator,
        tools,
        artifacts,
    )
    .with_checkpoints(checkpoints)
    .with_event_handler(LoggingHandler);

    let stop = orchestrator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let run_id = run_id.unwrap_or_else(dossier::agent::checkpoint::generate_run_id);
    info!("Run id: {run_id}");
    let outcome = match orchestrator.run_with_id(&bundle, &run_id).await {
        Ok(outcome) => outcome,
        Err(ResearchError::Cancelled) => {
            return Err(format!(
                "run cancelled; continue with `dossier resume --run-id {run_id}`"
            ));
        }
        Err(e) => return Err(e.to_string()),
    };

    let json = serde_json::to_string_pretty(&outcome)
        .map_err(|e| format!("Failed to serialize outcome: {e}"))?;
    println!("{json}");
    Ok(())
}
