use std::path::Path;

use anyhow::{Context, Result};

use stackflow_lib::graph::DependencyGraph;

use super::GlobalOptions;
use crate::output::print_success;

/// Check that the desired state compiles and its dependency graph is acyclic.
pub fn cmd_validate(file: &Path, options: &GlobalOptions) -> Result<()> {
  let stack = options.load(file)?;
  let graph = DependencyGraph::build(&stack.model).context("Invalid dependency graph")?;

  print_success(&format!(
    "Stack '{}' is valid: {} resource(s), {} output(s)",
    stack.name(),
    graph.len(),
    stack.model.outputs.len()
  ));
  Ok(())
}
