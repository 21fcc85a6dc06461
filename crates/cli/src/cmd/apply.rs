//! Implementation of the `stackflow apply` command.
//!
//! Plans (or loads a saved plan), applies it through the filesystem-backed
//! provider and exports outputs. Exits non-zero on a partial apply.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::info;

use stackflow_lib::execute::apply_plan;
use stackflow_lib::plan::Plan;

use super::{GlobalOptions, cancel_on_interrupt};
use crate::output::{format_duration, print_error, print_info, print_plan, print_report, print_stat, print_success};

/// Execute the apply command.
///
/// Prints the change-set, the per-entry outcome and the exported outputs.
/// A partial apply reports which entries succeeded, failed and were never
/// attempted, then returns an error.
pub fn cmd_apply(file: &Path, saved: Option<&Path>, parallelism: Option<usize>, options: &GlobalOptions) -> Result<()> {
  let stack = options.load(file)?;
  let saved = saved
    .map(|path| Plan::load(path).with_context(|| format!("Failed to load plan: {}", path.display())))
    .transpose()?;

  let provider = options.provider(&stack);
  let config = options.execute_config(parallelism);
  let started = Instant::now();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(async {
      let cancel = cancel_on_interrupt();
      apply_plan(&stack, saved, provider, &config, &cancel).await
    })
    .context("Apply failed")?;

  if outcome.plan.has_changes() {
    println!("Applying stack '{}':", outcome.plan.stack);
    print_plan(&outcome.plan, options.verbose);
    println!();
  }
  print_report(&outcome.report);

  for error in &outcome.output_errors {
    print_error(&error.to_string());
  }

  if !outcome.outputs.is_empty() {
    println!();
    println!("Outputs:");
    for (name, value) in &outcome.outputs {
      print_stat(name, value);
    }
  }

  let report = &outcome.report;
  info!(elapsed = %format_duration(started.elapsed()), "apply finished");

  if report.cancelled {
    bail!(
      "Apply cancelled: {} applied, {} not attempted",
      report.succeeded.len(),
      report.not_attempted.len()
    );
  }
  if !report.is_success() {
    bail!(
      "Apply incomplete: {} succeeded, {} failed, {} not attempted",
      report.succeeded.len(),
      report.failed.len(),
      report.not_attempted.len()
    );
  }
  if !outcome.output_errors.is_empty() {
    bail!("{} output(s) could not be resolved", outcome.output_errors.len());
  }

  if report.succeeded.is_empty() {
    print_info("No changes. Stack is up to date.");
  } else {
    println!();
    print_success(&format!(
      "Apply complete! {} resource(s) changed, {} unchanged in {}",
      report.succeeded.len(),
      report.unchanged.len(),
      format_duration(started.elapsed())
    ));
  }
  if let Some(id) = &outcome.snapshot_id {
    print_stat("Snapshot", id);
  }

  Ok(())
}
