//! Implementation of the `stackflow destroy` command.
//!
//! Deletes every resource recorded in the stack's state, dependents first.
//! Retained buckets are forgotten rather than deleted.

use std::path::Path;

use anyhow::{Context, Result, bail};

use stackflow_lib::execute::destroy_stack;
use stackflow_lib::plan::plan_destroy;

use super::{GlobalOptions, cancel_on_interrupt};
use crate::output::{print_info, print_plan, print_report, print_success};
use crate::prompts::confirm;

pub fn cmd_destroy(file: &Path, dry_run: bool, force: bool, options: &GlobalOptions) -> Result<()> {
  let stack = options.load(file)?;
  let state = stack.current_state().context("Failed to load state")?;

  if state.is_empty() {
    print_info("Nothing to destroy.");
    return Ok(());
  }

  let preview = plan_destroy(&state, &stack.environment);
  if dry_run {
    println!("Destroy dry run for stack '{}':", stack.name());
    print_plan(&preview, true);
    println!();
    print_info(&format!("Would remove {} resource(s)", preview.entries.len()));
    return Ok(());
  }

  println!("Destroying stack '{}':", stack.name());
  print_plan(&preview, false);
  if !confirm("Delete these resources?", force)? {
    print_info("Destroy aborted.");
    return Ok(());
  }

  let provider = options.provider(&stack);
  let config = options.execute_config(None);
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(async {
      let cancel = cancel_on_interrupt();
      destroy_stack(&stack, provider, &config, &cancel).await
    })
    .context("Destroy failed")?;

  println!();
  print_report(&outcome.report);

  let report = &outcome.report;
  if !report.is_success() {
    bail!(
      "Destroy incomplete: {} removed, {} failed, {} not attempted",
      report.succeeded.len(),
      report.failed.len(),
      report.not_attempted.len()
    );
  }

  print_success(&format!(
    "Destroy complete! {} resource(s) removed, {} retained",
    report.succeeded.len().saturating_sub(report.retained.len()),
    report.retained.len()
  ));
  Ok(())
}
