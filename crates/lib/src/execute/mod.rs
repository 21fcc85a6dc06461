//! Plan execution.
//!
//! Applies a [`Plan`] against a [`Provider`] wave by wave. It handles:
//! - bounded parallelism inside a wave (strict plan order when `parallelism` is 1)
//! - resolving each entry's attributes against the live state right before it runs
//! - convergence polling through `describe`
//! - a state checkpoint after every applied entry
//! - halting on the first failure, and cancellation between entries
//!
//! Nothing is rolled back: entries applied before a failure stay applied and
//! recorded, so the next plan resumes from exactly what is left.

pub mod apply;
pub mod resolver;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Environment;
use crate::model::{Attributes, RemovalPolicy, ResourceAddress, ResourceKind};
use crate::plan::{ChangeAction, Plan, PlanEntry};
use crate::provider::{Operation, Provider, ProviderError, RemoteResource};
use crate::state::{ResourceState, StateError, StateFile};

use resolver::{StateResolver, resolve_attributes};

pub use apply::{ApplyOutcome, LoadedStack, StackError, StackOptions, apply_plan, destroy_stack, load_stack, plan_stack};
pub use types::{ApplyError, ApplyReport, CancelFlag, ExecuteConfig, ExecuteError, FailedEntry, ReportEntry};

/// An entry ready to hand to the provider.
struct Job {
  entry: ReportEntry,
  /// Fully resolved attributes; empty for deletes.
  attributes: Attributes,
  prior: Option<ResourceState>,
  depends_on: Vec<String>,
}

/// What a finished job changes in the state.
struct Applied {
  /// `None` removes the resource from state.
  resource: Option<ResourceState>,
  /// Physical id of a retained bucket that was forgotten instead of deleted.
  retained: Option<String>,
}

struct Failure {
  error: ApplyError,
  /// The prior resource was already deleted when the failure happened.
  removed_prior: bool,
}

impl From<ApplyError> for Failure {
  fn from(error: ApplyError) -> Self {
    Self {
      error,
      removed_prior: false,
    }
  }
}

enum Prepared {
  Unchanged(ReportEntry),
  Run(Job),
}

/// Execute `plan`, recording every applied entry in `state` and handing the
/// state to `checkpoint` after each one.
///
/// Entry failures end up in the returned report; only a failed checkpoint or a
/// crashed task is an `Err`.
pub async fn execute_plan<F>(
  plan: &Plan,
  state: &mut StateFile,
  provider: Arc<dyn Provider>,
  config: &ExecuteConfig,
  cancel: &CancelFlag,
  mut checkpoint: F,
) -> Result<ApplyReport, ExecuteError>
where
  F: FnMut(&StateFile) -> Result<(), StateError>,
{
  let mut waves: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
  for (index, entry) in plan.entries.iter().enumerate() {
    waves.entry(entry.wave).or_default().push(index);
  }

  info!(
    stack = %plan.stack,
    entries = plan.entries.len(),
    waves = waves.len(),
    parallelism = config.parallelism,
    "executing plan"
  );

  let mut report = ApplyReport::default();
  let halted = Arc::new(AtomicBool::new(false));
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));

  for (wave, indices) in waves {
    let mut jobs = Vec::new();
    for index in indices {
      let entry = &plan.entries[index];
      if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
        skip(&mut report, index, entry);
        continue;
      }
      match prepare(index, entry, state, &plan.environment) {
        Ok(Prepared::Unchanged(skipped)) => report.unchanged.push(skipped),
        Ok(Prepared::Run(job)) => jobs.push(job),
        Err(error) => {
          error!(address = %entry.address, error = %error, "cannot resolve attributes");
          report.failed.push(FailedEntry {
            entry: report_entry(index, entry, entry.action),
            error,
          });
          halted.store(true, Ordering::SeqCst);
        }
      }
    }

    if halted.load(Ordering::SeqCst) {
      report.not_attempted.extend(jobs.into_iter().map(|job| job.entry));
      continue;
    }
    if jobs.is_empty() {
      continue;
    }

    debug!(wave, jobs = jobs.len(), "executing wave");

    if config.parallelism <= 1 {
      for job in jobs {
        if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
          report.not_attempted.push(job.entry);
          continue;
        }
        let result = run_job(provider.as_ref(), &job, config).await;
        settle(&mut report, state, &mut checkpoint, &halted, job, Some(result))?;
      }
    } else {
      let mut join_set = JoinSet::new();
      for job in jobs {
        let provider = provider.clone();
        let config = config.clone();
        let semaphore = semaphore.clone();
        let halted = halted.clone();
        let cancel = cancel.clone();

        join_set.spawn(async move {
          let Ok(_permit) = semaphore.acquire().await else {
            return (job, None);
          };
          if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
            return (job, None);
          }
          let result = run_job(provider.as_ref(), &job, &config).await;
          // Siblings still waiting for a permit must see the failure before this one is settled.
          if result.is_err() {
            halted.store(true, Ordering::SeqCst);
          }
          (job, Some(result))
        });
      }

      while let Some(joined) = join_set.join_next().await {
        let (job, result) = joined.map_err(|e| ExecuteError::TaskJoin(e.to_string()))?;
        settle(&mut report, state, &mut checkpoint, &halted, job, result)?;
      }
    }
  }

  report.cancelled = cancel.is_cancelled() && !report.not_attempted.is_empty();
  report.sort();

  info!(
    succeeded = report.succeeded.len(),
    failed = report.failed.len(),
    not_attempted = report.not_attempted.len(),
    unchanged = report.unchanged.len(),
    cancelled = report.cancelled,
    "plan execution complete"
  );

  Ok(report)
}

fn report_entry(index: usize, entry: &PlanEntry, action: ChangeAction) -> ReportEntry {
  ReportEntry {
    index,
    address: entry.address.clone(),
    action,
  }
}

fn skip(report: &mut ApplyReport, index: usize, entry: &PlanEntry) {
  if entry.is_noop() {
    report.unchanged.push(report_entry(index, entry, ChangeAction::NoOp));
  } else {
    report.not_attempted.push(report_entry(index, entry, entry.action));
  }
}

/// Resolve an entry against the live state and decide what actually has to happen.
///
/// A planned update whose resolved attributes match the recorded ones is
/// skipped. A planned replace whose replace-required attributes turned out
/// unchanged becomes an in-place update.
fn prepare(index: usize, entry: &PlanEntry, state: &StateFile, env: &Environment) -> Result<Prepared, ApplyError> {
  let kind = entry.address.kind;
  let prior = state.get(entry.id()).cloned();

  let desired = match (entry.action, &entry.desired) {
    (ChangeAction::NoOp, _) => {
      return Ok(Prepared::Unchanged(report_entry(index, entry, ChangeAction::NoOp)));
    }
    (ChangeAction::Delete, _) | (_, None) => {
      if prior.is_none() {
        debug!(address = %entry.address, "already absent from state");
        return Ok(Prepared::Unchanged(report_entry(index, entry, ChangeAction::NoOp)));
      }
      return Ok(Prepared::Run(Job {
        entry: report_entry(index, entry, ChangeAction::Delete),
        attributes: Attributes::new(),
        prior,
        depends_on: Vec::new(),
      }));
    }
    (_, Some(desired)) => desired,
  };

  let resolver = StateResolver::new(state, env);
  let attributes = resolve_attributes(kind, desired, &resolver).map_err(|source| ApplyError::Resolve {
    address: entry.address.clone(),
    source,
  })?;

  let action = match &prior {
    None => ChangeAction::Create,
    Some(prior) if prior.kind != kind => ChangeAction::Replace,
    Some(prior) if prior.attributes == attributes => {
      debug!(address = %entry.address, planned = %entry.action, "resolved attributes match state, skipping");
      return Ok(Prepared::Unchanged(report_entry(index, entry, ChangeAction::NoOp)));
    }
    Some(prior) => {
      let replace = kind
        .replace_keys()
        .iter()
        .any(|key| prior.attributes.get(*key) != attributes.get(*key));
      if replace {
        ChangeAction::Replace
      } else {
        ChangeAction::Update
      }
    }
  };

  if action != entry.action {
    debug!(address = %entry.address, planned = %entry.action, %action, "action refined at apply time");
  }

  Ok(Prepared::Run(Job {
    entry: report_entry(index, entry, action),
    attributes,
    prior,
    depends_on: entry.depends_on.clone(),
  }))
}

/// Record a finished job in the state and the report.
fn settle<F>(
  report: &mut ApplyReport,
  state: &mut StateFile,
  checkpoint: &mut F,
  halted: &AtomicBool,
  job: Job,
  result: Option<Result<Applied, Failure>>,
) -> Result<(), ExecuteError>
where
  F: FnMut(&StateFile) -> Result<(), StateError>,
{
  let id = job.entry.address.id.clone();
  match result {
    None => report.not_attempted.push(job.entry),
    Some(Ok(applied)) => {
      match applied.resource {
        Some(resource) => state.record(&id, resource),
        None => {
          state.forget(&id);
        }
      }
      if let Some(retained) = applied.retained {
        report.retained.push(retained);
      }
      checkpoint(state)?;
      info!(address = %job.entry.address, action = %job.entry.action, "applied");
      report.succeeded.push(job.entry);
    }
    Some(Err(failure)) => {
      error!(address = %job.entry.address, action = %job.entry.action, error = %failure.error, "apply failed");
      halted.store(true, Ordering::SeqCst);
      if failure.removed_prior {
        state.forget(&id);
        checkpoint(state)?;
      }
      report.failed.push(FailedEntry {
        entry: job.entry,
        error: failure.error,
      });
    }
  }
  Ok(())
}

async fn run_job(provider: &dyn Provider, job: &Job, config: &ExecuteConfig) -> Result<Applied, Failure> {
  match job.entry.action {
    ChangeAction::Delete => {
      let retained = match &job.prior {
        Some(prior) => remove(provider, &job.entry.address, prior, config).await?,
        None => None,
      };
      Ok(Applied {
        resource: None,
        retained,
      })
    }
    ChangeAction::Replace => {
      let retained = match &job.prior {
        Some(prior) => remove(provider, &job.entry.address, prior, config).await?,
        None => None,
      };
      let resource = create(provider, job, config).await.map_err(|error| Failure {
        error,
        removed_prior: job.prior.is_some(),
      })?;
      Ok(Applied {
        resource: Some(resource),
        retained,
      })
    }
    ChangeAction::Create => Ok(Applied {
      resource: Some(create(provider, job, config).await?),
      retained: None,
    }),
    ChangeAction::Update => {
      let resource = match &job.prior {
        Some(prior) => update(provider, job, prior, config).await?,
        None => create(provider, job, config).await?,
      };
      Ok(Applied {
        resource: Some(resource),
        retained: None,
      })
    }
    ChangeAction::NoOp => Ok(Applied {
      resource: job.prior.clone(),
      retained: None,
    }),
  }
}

fn provider_error(address: &ResourceAddress, operation: Operation) -> impl FnOnce(ProviderError) -> ApplyError + '_ {
  move |source| ApplyError::Provider {
    address: address.clone(),
    operation,
    source,
  }
}

async fn create(provider: &dyn Provider, job: &Job, config: &ExecuteConfig) -> Result<ResourceState, ApplyError> {
  let address = &job.entry.address;
  let physical_id = provider
    .create(address.kind, &job.attributes)
    .await
    .map_err(provider_error(address, Operation::Create))?;

  let remote = converged(provider, address, &physical_id, &job.attributes, Operation::Create, config).await?;

  Ok(ResourceState {
    kind: address.kind,
    physical_id,
    attributes: job.attributes.clone(),
    outputs: remote.outputs,
    depends_on: job.depends_on.clone(),
  })
}

async fn update(
  provider: &dyn Provider,
  job: &Job,
  prior: &ResourceState,
  config: &ExecuteConfig,
) -> Result<ResourceState, ApplyError> {
  let address = &job.entry.address;
  provider
    .update(address.kind, &prior.physical_id, &job.attributes)
    .await
    .map_err(provider_error(address, Operation::Update))?;

  let remote = converged(provider, address, &prior.physical_id, &job.attributes, Operation::Update, config).await?;

  Ok(ResourceState {
    kind: address.kind,
    physical_id: prior.physical_id.clone(),
    attributes: job.attributes.clone(),
    outputs: remote.outputs,
    depends_on: job.depends_on.clone(),
  })
}

/// Delete the recorded resource, or leave it in place when it is a retained
/// bucket. Returns the physical id of a retained bucket.
async fn remove(
  provider: &dyn Provider,
  address: &ResourceAddress,
  prior: &ResourceState,
  config: &ExecuteConfig,
) -> Result<Option<String>, ApplyError> {
  if prior.kind == ResourceKind::Bucket && prior.removal_policy() == RemovalPolicy::Retain {
    warn!(
      %address,
      bucket = %prior.physical_id,
      "bucket has removal_policy retain; leaving it in place and forgetting it (orphaned)"
    );
    return Ok(Some(prior.physical_id.clone()));
  }

  match provider.delete(prior.kind, &prior.physical_id).await {
    Ok(()) => {}
    Err(ProviderError::NotFound { .. }) => {
      debug!(%address, "already deleted");
      return Ok(None);
    }
    Err(source) => return Err(provider_error(address, Operation::Delete)(source)),
  }

  let polls = config.max_polls.max(1);
  for poll in 1..=polls {
    let view = provider
      .describe(prior.kind, &prior.physical_id)
      .await
      .map_err(provider_error(address, Operation::Describe))?;
    if view.is_none() {
      debug!(%address, poll, "deletion confirmed");
      return Ok(None);
    }
    if poll < polls {
      tokio::time::sleep(config.poll_interval).await;
    }
  }

  Err(ApplyError::NotConverged {
    address: address.clone(),
    operation: Operation::Delete,
    polls,
  })
}

/// Poll until the provider reports `expected` for `id`.
async fn converged(
  provider: &dyn Provider,
  address: &ResourceAddress,
  id: &str,
  expected: &Attributes,
  operation: Operation,
  config: &ExecuteConfig,
) -> Result<RemoteResource, ApplyError> {
  let polls = config.max_polls.max(1);
  for poll in 1..=polls {
    let view = provider
      .describe(address.kind, id)
      .await
      .map_err(provider_error(address, Operation::Describe))?;
    match view {
      Some(remote) if remote.attributes == *expected => {
        debug!(%address, poll, "converged");
        return Ok(remote);
      }
      _ => debug!(%address, poll, "waiting for convergence"),
    }
    if poll < polls {
      tokio::time::sleep(config.poll_interval).await;
    }
  }

  Err(ApplyError::NotConverged {
    address: address.clone(),
    operation,
    polls,
  })
}
