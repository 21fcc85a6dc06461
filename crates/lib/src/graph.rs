//! Dependency graph for resource ordering.
//!
//! Resources live in a petgraph arena; edges run from a dependency to its
//! dependent, so "B must converge before A is applied" is the edge `B -> A`.
//! Edges come only from `$${ref:...}` placeholders in attribute values.
//!
//! Pipelines carry a second, stage-level flow graph: each stage runs after its
//! predecessor, and every stage consuming an artifact runs after the stage
//! producing it. A deploy action consuming an artifact from its own or a later
//! stage closes a cycle in that graph.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::model::{ActionDecl, PipelineDecl, ResourceAddress, ResourceModel};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
  #[error("{from} references unknown resource: {symbol}")]
  UnresolvedReference { from: ResourceAddress, symbol: String },

  #[error("{from} references {symbol}, which {target} does not export")]
  UnknownAttribute {
    from: ResourceAddress,
    target: ResourceAddress,
    symbol: String,
  },

  #[error("dependency cycle: {}", path.join(" -> "))]
  Cycle { path: Vec<String> },
}

impl GraphError {
  /// The symbol that could not be resolved, for reference errors.
  pub fn unresolved_symbol(&self) -> Option<&str> {
    match self {
      GraphError::UnresolvedReference { symbol, .. } | GraphError::UnknownAttribute { symbol, .. } => Some(symbol),
      GraphError::Cycle { .. } => None,
    }
  }
}

#[derive(Debug, Clone)]
struct GraphNode {
  address: ResourceAddress,
  decl_index: usize,
}

/// The resource dependency DAG.
pub struct DependencyGraph {
  graph: DiGraph<GraphNode, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
  /// Build the graph for a compiled model.
  ///
  /// # Errors
  ///
  /// Returns `UnresolvedReference`/`UnknownAttribute` for references to
  /// resources or attributes that do not exist, and `Cycle` when the resource
  /// graph or any pipeline's artifact flow is cyclic.
  pub fn build(model: &ResourceModel) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    // Nodes are added in declaration order, so node indices sort the same way.
    let mut ordered: Vec<_> = model.resources.iter().collect();
    ordered.sort_by_key(|r| r.decl_index);

    for resource in &ordered {
      let idx = graph.add_node(GraphNode {
        address: resource.address.clone(),
        decl_index: resource.decl_index,
      });
      nodes.insert(resource.id().to_string(), idx);
    }

    for resource in &ordered {
      let dependent = nodes[resource.id()];

      for (id, attribute) in resource.references() {
        let symbol = format!("{id}.{attribute}");
        let Some(target) = model.get(&id) else {
          return Err(GraphError::UnresolvedReference {
            from: resource.address.clone(),
            symbol,
          });
        };
        if !target.exports(&attribute) {
          return Err(GraphError::UnknownAttribute {
            from: resource.address.clone(),
            target: target.address.clone(),
            symbol,
          });
        }
        graph.update_edge(nodes[&id], dependent, ());
      }
    }

    if let Some(cycle) = find_cycle(&graph) {
      return Err(GraphError::Cycle {
        path: cycle.iter().map(|&idx| graph[idx].address.to_string()).collect(),
      });
    }

    for pipeline in &model.pipelines {
      check_pipeline_flow(pipeline)?;
    }

    debug!(nodes = graph.node_count(), edges = graph.edge_count(), "built dependency graph");

    Ok(Self { graph, nodes })
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  fn neighbors(&self, id: &str, direction: Direction) -> Vec<String> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };
    let mut found: Vec<_> = self.graph.neighbors_directed(idx, direction).collect();
    found.sort();
    found.dedup();
    found
      .into_iter()
      .map(|n| self.graph[n].address.id.clone())
      .collect()
  }

  /// Logical ids `id` depends on, in declaration order.
  pub fn dependencies(&self, id: &str) -> Vec<String> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Logical ids that depend on `id`, in declaration order.
  pub fn dependents(&self, id: &str) -> Vec<String> {
    self.neighbors(id, Direction::Outgoing)
  }

  /// Group resources into waves. Every dependency of a resource sits in an
  /// earlier wave; inside a wave resources keep declaration order.
  pub fn waves(&self) -> Vec<Vec<String>> {
    let count = self.graph.node_count();
    let mut in_degree: Vec<usize> = self
      .graph
      .node_indices()
      .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
      .collect();
    let mut placed = vec![false; count];
    let mut waves = Vec::new();

    loop {
      let mut ready: Vec<NodeIndex> = self
        .graph
        .node_indices()
        .filter(|idx| !placed[idx.index()] && in_degree[idx.index()] == 0)
        .collect();

      // The graph was checked for cycles on construction.
      if ready.is_empty() {
        break;
      }

      ready.sort_by_key(|idx| self.graph[*idx].decl_index);

      for &idx in &ready {
        placed[idx.index()] = true;
        for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          in_degree[dependent.index()] = in_degree[dependent.index()].saturating_sub(1);
        }
      }

      waves.push(ready.into_iter().map(|idx| self.graph[idx].address.id.clone()).collect());
    }

    waves
  }

  /// Wave index for every resource.
  pub fn wave_of(&self) -> HashMap<String, usize> {
    self
      .waves()
      .into_iter()
      .enumerate()
      .flat_map(|(wave, ids)| ids.into_iter().map(move |id| (id, wave)))
      .collect()
  }

  /// All resources in a valid topological order.
  pub fn topological_order(&self) -> Vec<String> {
    self.waves().into_iter().flatten().collect()
  }

  /// Every `(dependency, dependent)` edge, sorted by declaration order.
  pub fn edges(&self) -> Vec<(ResourceAddress, ResourceAddress)> {
    let mut edges: Vec<_> = self
      .graph
      .edge_indices()
      .filter_map(|e| self.graph.edge_endpoints(e))
      .collect();
    edges.sort_by_key(|(from, to)| (self.graph[*to].decl_index, self.graph[*from].decl_index));
    edges
      .into_iter()
      .map(|(from, to)| (self.graph[from].address.clone(), self.graph[to].address.clone()))
      .collect()
  }
}

/// Depth-first search with recursion-stack marking.
///
/// Returns the first cycle found, starting and ending at the same node.
fn find_cycle<N>(graph: &DiGraph<N, ()>) -> Option<Vec<NodeIndex>> {
  #[derive(Clone, Copy, PartialEq, Eq)]
  enum Mark {
    Unvisited,
    OnStack,
    Done,
  }

  fn visit<N>(
    graph: &DiGraph<N, ()>,
    node: NodeIndex,
    marks: &mut [Mark],
    stack: &mut Vec<NodeIndex>,
  ) -> Option<Vec<NodeIndex>> {
    marks[node.index()] = Mark::OnStack;
    stack.push(node);

    let mut next: Vec<_> = graph.neighbors_directed(node, Direction::Outgoing).collect();
    next.sort();

    for succ in next {
      match marks[succ.index()] {
        Mark::OnStack => {
          let start = stack.iter().position(|&n| n == succ).unwrap_or(0);
          let mut cycle = stack[start..].to_vec();
          cycle.push(succ);
          return Some(cycle);
        }
        Mark::Unvisited => {
          if let Some(cycle) = visit(graph, succ, marks, stack) {
            return Some(cycle);
          }
        }
        Mark::Done => {}
      }
    }

    stack.pop();
    marks[node.index()] = Mark::Done;
    None
  }

  let mut marks = vec![Mark::Unvisited; graph.node_count()];
  let mut stack = Vec::new();

  for node in graph.node_indices() {
    if marks[node.index()] == Mark::Unvisited
      && let Some(cycle) = visit(graph, node, &mut marks, &mut stack)
    {
      return Some(cycle);
    }
  }
  None
}

/// Check that artifacts flow forward through a pipeline's stages.
pub fn check_pipeline_flow(pipeline: &PipelineDecl) -> Result<(), GraphError> {
  let mut graph: DiGraph<String, ()> = DiGraph::new();
  let stages: Vec<NodeIndex> = pipeline
    .stages
    .iter()
    .map(|stage| graph.add_node(format!("{}.{}", pipeline.id, stage.name)))
    .collect();

  for pair in stages.windows(2) {
    graph.update_edge(pair[0], pair[1], ());
  }

  let mut producers = HashMap::new();
  for (position, stage) in pipeline.stages.iter().enumerate() {
    for action in &stage.actions {
      if let ActionDecl::Source(source) = action {
        producers.insert(source.output.as_str(), position);
      }
    }
  }

  for (position, stage) in pipeline.stages.iter().enumerate() {
    for action in &stage.actions {
      if let ActionDecl::Deploy(deploy) = action
        && let Some(&producer) = producers.get(deploy.input.as_str())
      {
        graph.update_edge(stages[producer], stages[position], ());
      }
    }
  }

  match find_cycle(&graph) {
    Some(cycle) => Err(GraphError::Cycle {
      path: cycle.iter().map(|&idx| graph[idx].clone()).collect(),
    }),
    None => Ok(()),
  }
}
