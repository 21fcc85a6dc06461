//! Stack orchestration.
//!
//! Ties the phases together for one stack:
//!
//! 1. Evaluate the desired-state file and resolve the environment
//! 2. Compile and validate the resource model
//! 3. Lock the stack's state directory and load the current state
//! 4. Plan (or check a saved plan is still current)
//! 5. Execute, checkpointing one snapshot per run
//! 6. Export outputs into the state
//!
//! Structural errors surface before step 5, so they never reach a provider.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, Environment, EnvironmentOverrides};
use crate::eval::{EvalError, EvaluatedConfig, evaluate_config};
use crate::model::{ResourceModel, ValidationError};
use crate::outputs::{OutputError, export_available};
use crate::plan::{self, Plan, PlanError};
use crate::provider::Provider;
use crate::state::{LockCommand, StateError, StateFile, StateLockError, StateStore};

use super::execute_plan;
use super::types::{ApplyReport, CancelFlag, ExecuteConfig, ExecuteError};

#[derive(Debug, Error)]
pub enum StackError {
  #[error(transparent)]
  Eval(#[from] EvalError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("invalid desired state: {0}")]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Lock(#[from] StateLockError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),
}

/// Where state lives and which environment values were given explicitly.
#[derive(Debug, Clone)]
pub struct StackOptions {
  /// Root data directory; each stack keeps its state under `stacks/<name>/`.
  pub data_dir: PathBuf,
  pub overrides: EnvironmentOverrides,
}

/// A desired-state file, compiled and bound to its state store.
#[derive(Debug)]
pub struct LoadedStack {
  pub config: EvaluatedConfig,
  pub model: ResourceModel,
  pub environment: Environment,
  pub store: StateStore,
}

impl LoadedStack {
  pub fn name(&self) -> &str {
    &self.model.stack
  }

  /// The current state, read under a shared lock.
  pub fn current_state(&self) -> Result<StateFile, StackError> {
    let _lock = self.store.lock(self.name(), LockCommand::Status)?;
    Ok(self.store.load_or_empty(self.name())?)
  }
}

/// Result of an apply or destroy run.
#[derive(Debug)]
pub struct ApplyOutcome {
  pub plan: Plan,
  pub report: ApplyReport,
  pub outputs: BTreeMap<String, String>,
  /// Outputs whose resources did not converge.
  pub output_errors: Vec<OutputError>,
  /// Snapshot written by this run, if anything changed.
  pub snapshot_id: Option<String>,
  pub state: StateFile,
}

impl ApplyOutcome {
  pub fn is_success(&self) -> bool {
    self.report.is_success() && self.output_errors.is_empty()
  }
}

/// Evaluate, resolve the environment for, and compile a desired-state file.
pub fn load_stack(path: &Path, options: &StackOptions) -> Result<LoadedStack, StackError> {
  let config = evaluate_config(path)?;
  let environment = Environment::resolve(&options.overrides, &config.desired.environment)?;
  let model = ResourceModel::from_desired(&config.desired, &config.base_dir)?;
  let store = StateStore::for_stack(&options.data_dir, &model.stack);

  Ok(LoadedStack {
    config,
    model,
    environment,
    store,
  })
}

/// Plan `stack` against its current state.
pub fn plan_stack(stack: &LoadedStack) -> Result<(Plan, StateFile), StackError> {
  let _lock = stack.store.lock(stack.name(), LockCommand::Plan)?;
  let state = stack.store.load_or_empty(stack.name())?;
  let plan = plan::plan(&stack.model, &state, &stack.environment)?;
  Ok((plan, state))
}

/// Plan (or take `saved`) and apply it.
pub async fn apply_plan(
  stack: &LoadedStack,
  saved: Option<Plan>,
  provider: Arc<dyn Provider>,
  config: &ExecuteConfig,
  cancel: &CancelFlag,
) -> Result<ApplyOutcome, StackError> {
  let _lock = stack.store.lock(stack.name(), LockCommand::Apply)?;
  let state = stack.store.load_or_empty(stack.name())?;

  let plan = match saved {
    Some(plan) => {
      plan.check_current(stack.name(), state.serial)?;
      plan
    }
    None => plan::plan(&stack.model, &state, &stack.environment)?,
  };

  run(&stack.store, plan, state, provider, config, cancel).await
}

/// Delete everything the stack's state records.
///
/// A complete teardown also clears the current snapshot pointer; a partial one
/// leaves a snapshot with whatever is still recorded.
pub async fn destroy_stack(
  stack: &LoadedStack,
  provider: Arc<dyn Provider>,
  config: &ExecuteConfig,
  cancel: &CancelFlag,
) -> Result<ApplyOutcome, StackError> {
  let _lock = stack.store.lock(stack.name(), LockCommand::Destroy)?;
  let state = stack.store.load_or_empty(stack.name())?;
  let plan = plan::plan_destroy(&state, &stack.environment);

  let outcome = run(&stack.store, plan, state, provider, config, cancel).await?;
  if outcome.report.is_success() && outcome.state.is_empty() && outcome.snapshot_id.is_some() {
    stack.store.clear_current()?;
    info!(stack = stack.name(), "stack destroyed");
  }
  Ok(outcome)
}

async fn run(
  store: &StateStore,
  plan: Plan,
  mut state: StateFile,
  provider: Arc<dyn Provider>,
  config: &ExecuteConfig,
  cancel: &CancelFlag,
) -> Result<ApplyOutcome, StackError> {
  let snapshot_id = StateStore::generate_id();
  let mut written = false;

  let report = execute_plan(&plan, &mut state, provider, config, cancel, |s| {
    written = true;
    store.checkpoint(&snapshot_id, s)
  })
  .await?;

  let (outputs, output_errors) = export_available(&plan.outputs, &state, &plan.environment);
  let serial = state.serial;
  state.set_outputs(outputs.clone());
  if state.serial != serial {
    store.checkpoint(&snapshot_id, &state)?;
    written = true;
  }

  info!(
    stack = %plan.stack,
    snapshot = written.then_some(snapshot_id.as_str()),
    serial = state.serial,
    success = report.is_success(),
    "run finished"
  );

  Ok(ApplyOutcome {
    plan,
    report,
    outputs,
    output_errors,
    snapshot_id: written.then_some(snapshot_id),
    state,
  })
}
