//! Command-line driver: runs the orchestration loop against a workspace
//! directory, one or more times, collecting task input on stdin unless
//! `--non-interactive` is set.

use std::path::PathBuf;

use clap::Parser;
use der_core::{run_once, Config, NonInteractivePrompter, Provider, RoleRoutingStubProvider, StdinPrompter, TaskPrompter};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "der", about = "Dynamic Ensemble Reasoning orchestrator")]
struct Args {
    /// Workspace root holding memory/, task/ and prompts/. Overridden by
    /// DER_ROOT if set.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Number of pipeline runs to execute before exiting.
    #[arg(long, default_value_t = 1)]
    runs: u32,

    /// Refuse to prompt on stdin; fail fast if task fields are missing.
    #[arg(long)]
    non_interactive: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env(&args.root);
    let non_interactive = config.non_interactive || args.non_interactive;

    let prompter: Box<dyn TaskPrompter> = if non_interactive {
        Box::new(NonInteractivePrompter)
    } else {
        Box::new(StdinPrompter)
    };

    // Real network-backed providers are out of scope for this crate; the
    // stub keeps the CLI runnable end-to-end for dry runs and smoke tests.
    let provider: Box<dyn Provider> = Box::new(RoleRoutingStubProvider);

    for run in 1..=args.runs {
        tracing::info!(run, total = args.runs, "starting pipeline run");
        let outcome = run_once(&config.root, prompter.as_ref(), provider.as_ref()).await?;
        tracing::info!(
            run_id = %outcome.run_id,
            phase = %outcome.phase,
            runs_completed = outcome.runs_completed,
            "pipeline run complete"
        );
    }

    Ok(())
}
