//! Implementation of the `stackflow graph` command.
//!
//! Prints the execution waves and the dependency edges derived from
//! references between resources.

use std::path::Path;

use anyhow::{Context, Result};

use stackflow_lib::graph::DependencyGraph;

use super::GlobalOptions;
use crate::output::symbols;

pub fn cmd_graph(file: &Path, options: &GlobalOptions) -> Result<()> {
  let stack = options.load(file)?;
  let graph = DependencyGraph::build(&stack.model).context("Failed to build dependency graph")?;

  println!("Waves:");
  for (wave, ids) in graph.waves().iter().enumerate() {
    let addresses: Vec<String> = ids
      .iter()
      .filter_map(|id| stack.model.get(id))
      .map(|r| r.address.to_string())
      .collect();
    println!("  {}: {}", wave, addresses.join(", "));
  }

  let edges = graph.edges();
  if !edges.is_empty() {
    println!();
    println!("Dependencies:");
    for (dependency, dependent) in edges {
      println!("  {} {} {}", dependent, symbols::ARROW, dependency);
    }
  }

  Ok(())
}
