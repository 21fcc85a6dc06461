mod apply;
mod destroy;
mod graph;
mod outputs;
mod plan;
mod status;
mod validate;

pub use apply::cmd_apply;
pub use destroy::cmd_destroy;
pub use graph::cmd_graph;
pub use outputs::cmd_outputs;
pub use plan::cmd_plan;
pub use status::cmd_status;
pub use validate::cmd_validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use stackflow_lib::config::EnvironmentOverrides;
use stackflow_lib::execute::{CancelFlag, ExecuteConfig, LoadedStack, StackOptions, load_stack};
use stackflow_lib::platform::paths;
use stackflow_lib::provider::{LocalProvider, Provider, ProviderConfig};

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
  pub region: Option<String>,
  pub account: Option<String>,
  pub provider_root: Option<PathBuf>,
  pub poll_interval: Option<Duration>,
  pub verbose: bool,
}

impl GlobalOptions {
  /// Evaluate and compile the desired-state file at `file`.
  pub fn load(&self, file: &Path) -> Result<LoadedStack> {
    let options = StackOptions {
      data_dir: paths::data_dir(),
      overrides: EnvironmentOverrides {
        region: self.region.clone(),
        account: self.account.clone(),
      },
    };
    load_stack(file, &options).with_context(|| format!("Failed to load stack: {}", file.display()))
  }

  /// The filesystem-backed provider for `stack`'s environment.
  pub fn provider(&self, stack: &LoadedStack) -> Arc<dyn Provider> {
    let root = self.provider_root.clone().unwrap_or_else(paths::provider_dir);
    Arc::new(LocalProvider::new(root, ProviderConfig::from_env(&stack.environment)))
  }

  pub fn execute_config(&self, parallelism: Option<usize>) -> ExecuteConfig {
    let mut config = ExecuteConfig::default();
    if let Some(parallelism) = parallelism {
      config.parallelism = parallelism.max(1);
    }
    if let Some(interval) = self.poll_interval {
      config.poll_interval = interval;
    }
    config
  }
}

/// A cancellation flag that Ctrl-C sets.
///
/// Must be called from inside the runtime that drives the apply.
fn cancel_on_interrupt() -> CancelFlag {
  let cancel = CancelFlag::new();
  let flag = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, stopping after in-flight resources");
      flag.cancel();
    }
  });
  cancel
}
