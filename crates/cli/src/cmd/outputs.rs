//! Implementation of the `stackflow outputs` command.

use std::path::Path;

use anyhow::{Context, Result};

use super::GlobalOptions;
use crate::output::{print_info, print_json};

/// Print the outputs recorded by the last apply, one `Name = value` per line.
pub fn cmd_outputs(file: &Path, json: bool, options: &GlobalOptions) -> Result<()> {
  let stack = options.load(file)?;
  let state = stack.current_state().context("Failed to load state")?;

  if json {
    return print_json(&state.outputs);
  }

  if state.outputs.is_empty() {
    print_info("No outputs recorded. Run 'stackflow apply' first.");
    return Ok(());
  }

  for (name, value) in &state.outputs {
    println!("{} = {}", name, value);
  }
  Ok(())
}
