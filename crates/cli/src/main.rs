mod cmd;
mod output;
mod prompts;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stackflow_lib::consts::DEFAULT_STACK_FILE;

use crate::cmd::GlobalOptions;

/// stackflow - Declarative deployment of buckets, bucket policies and promotion pipelines
#[derive(Parser)]
#[command(name = "stackflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log output (-v info, -vv debug)
  #[arg(short, long, global = true, action = ArgAction::Count)]
  verbose: u8,

  /// Deployment region, overriding the desired-state file
  #[arg(long, global = true, env = "STACKFLOW_REGION")]
  region: Option<String>,

  /// Deployment account, overriding the desired-state file
  #[arg(long, global = true, env = "STACKFLOW_ACCOUNT")]
  account: Option<String>,

  /// Root directory of the filesystem-backed provider
  #[arg(long, global = true, env = "STACKFLOW_PROVIDER_ROOT")]
  provider_root: Option<PathBuf>,

  /// Delay between convergence polls (e.g. 250ms, 2s)
  #[arg(long, global = true, value_parser = humantime::parse_duration)]
  poll_interval: Option<Duration>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show the change-set without touching any resource
  Plan {
    /// Desired-state file
    #[arg(default_value = DEFAULT_STACK_FILE)]
    file: PathBuf,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,

    /// Save the plan for a later `apply --plan`
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
  },

  /// Apply the change-set and export outputs
  Apply {
    /// Desired-state file
    #[arg(default_value = DEFAULT_STACK_FILE)]
    file: PathBuf,

    /// Apply a plan saved with `plan --out` instead of planning again
    #[arg(long, value_name = "PATH")]
    plan: Option<PathBuf>,

    /// Maximum number of independent resources applied at once
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    parallelism: Option<u16>,
  },

  /// Delete every resource recorded for the stack
  Destroy {
    /// Desired-state file
    #[arg(default_value = DEFAULT_STACK_FILE)]
    file: PathBuf,

    /// Only show what would be deleted
    #[arg(long)]
    dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    force: bool,
  },

  /// Show the last-known state of the stack
  Status {
    /// Desired-state file
    #[arg(default_value = DEFAULT_STACK_FILE)]
    file: PathBuf,

    /// Print the state as JSON
    #[arg(long)]
    json: bool,
  },

  /// Print the outputs exported by the last apply
  Outputs {
    /// Desired-state file
    #[arg(default_value = DEFAULT_STACK_FILE)]
    file: PathBuf,

    /// Print outputs as a JSON object
    #[arg(long)]
    json: bool,
  },

  /// Show the dependency graph and execution waves
  Graph {
    /// Desired-state file
    #[arg(default_value = DEFAULT_STACK_FILE)]
    file: PathBuf,
  },

  /// Check the desired state without planning
  Validate {
    /// Desired-state file
    #[arg(default_value = DEFAULT_STACK_FILE)]
    file: PathBuf,
  },
}

fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let options = GlobalOptions {
    region: cli.region,
    account: cli.account,
    provider_root: cli.provider_root,
    poll_interval: cli.poll_interval,
    verbose: cli.verbose > 0,
  };

  match cli.command {
    Commands::Plan { file, json, out } => cmd::cmd_plan(&file, json, out.as_deref(), &options),
    Commands::Apply {
      file,
      plan,
      parallelism,
    } => cmd::cmd_apply(&file, plan.as_deref(), parallelism.map(usize::from), &options),
    Commands::Destroy { file, dry_run, force } => cmd::cmd_destroy(&file, dry_run, force, &options),
    Commands::Status { file, json } => cmd::cmd_status(&file, json, &options),
    Commands::Outputs { file, json } => cmd::cmd_outputs(&file, json, &options),
    Commands::Graph { file } => cmd::cmd_graph(&file, &options),
    Commands::Validate { file } => cmd::cmd_validate(&file, &options),
  }
}
