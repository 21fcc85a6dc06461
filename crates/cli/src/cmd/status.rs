//! Status command implementation.
//!
//! Displays the stack's last-known state: current snapshot, recorded
//! resources and exported outputs.

use std::path::Path;

use anyhow::{Context, Result};

use super::GlobalOptions;
use crate::output::{print_info, print_json, print_stat, print_success, symbols};

pub fn cmd_status(file: &Path, json: bool, options: &GlobalOptions) -> Result<()> {
  let stack = options.load(file)?;
  let state = stack.current_state().context("Failed to load state")?;
  let snapshot = stack.store.current_id().context("Failed to read state index")?;

  if json {
    let output = serde_json::json!({
      "snapshot_id": snapshot,
      "state": state,
    });
    return print_json(&output);
  }

  let Some(snapshot) = snapshot else {
    print_info(&format!(
      "No state recorded for stack '{}'. Run 'stackflow apply' to create one.",
      stack.name()
    ));
    return Ok(());
  };

  print_success(&format!("Stack '{}' at snapshot {}", stack.name(), snapshot));
  print_stat("Region", &stack.environment.region);
  print_stat("Serial", &state.serial.to_string());
  print_stat("Resources", &state.resources.len().to_string());
  print_stat("Outputs", &state.outputs.len().to_string());

  if !state.resources.is_empty() {
    println!();
    println!("Resources:");
    for (id, resource) in &state.resources {
      if options.verbose {
        println!(
          "  {} {}.{} ({}, {})",
          symbols::INFO,
          resource.kind,
          id,
          resource.physical_id,
          resource.removal_policy().as_str()
        );
      } else {
        println!("  {} {}.{}", symbols::INFO, resource.kind, id);
      }
    }
  }

  Ok(())
}
