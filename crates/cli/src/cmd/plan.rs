//! Implementation of the `stackflow plan` command.
//!
//! Evaluates a desired-state file, diffs it against the stack's last-known
//! state and prints the change-set. Nothing is sent to the provider.

use std::path::Path;

use anyhow::{Context, Result};

use stackflow_lib::execute::plan_stack;

use super::GlobalOptions;
use crate::output::{print_info, print_json, print_plan, print_stat, print_success, truncate_hash};

pub fn cmd_plan(file: &Path, json: bool, out: Option<&Path>, options: &GlobalOptions) -> Result<()> {
  let stack = options.load(file)?;
  let (plan, _) = plan_stack(&stack).context("Failed to compute plan")?;
  let id = plan.id().context("Failed to compute plan id")?;

  if let Some(out) = out {
    plan
      .save(out)
      .with_context(|| format!("Failed to save plan: {}", out.display()))?;
  }

  if json {
    let output = serde_json::json!({
      "id": id.0,
      "stack": plan.stack,
      "summary": plan.summary(),
      "entries": plan.entries,
    });
    return print_json(&output);
  }

  if !plan.has_changes() {
    print_info(&format!("No changes. Stack '{}' is up to date.", plan.stack));
  } else {
    println!("Plan {} for stack '{}':", truncate_hash(&id.0), plan.stack);
    print_plan(&plan, options.verbose);
    println!();
    print_stat("Summary", &plan.summary().to_string());
  }

  if let Some(out) = out {
    print_success(&format!("Plan saved to {}", out.display()));
  }

  Ok(())
}
