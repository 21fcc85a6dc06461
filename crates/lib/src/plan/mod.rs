//! The diff/plan engine.
//!
//! A plan is a pure function of the compiled model, the prior state and the
//! environment: the same inputs always give the same entries in the same
//! order. Deletes of resources that left the desired state come first
//! (dependents before their dependencies), then every declared resource wave
//! by wave, in declaration order inside a wave.

mod diff;
mod types;

pub use diff::classify;
pub use types::*;

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;
use tracing::{debug, info};

use crate::config::Environment;
use crate::execute::resolver::{Resolution, StateResolver, partially_resolve};
use crate::graph::DependencyGraph;
use crate::model::{ResourceAddress, ResourceKind, ResourceModel};
use crate::state::{ResourceState, StateFile};

/// Compute the change-set that converges `state` to `model`.
pub fn plan(model: &ResourceModel, state: &StateFile, env: &Environment) -> Result<Plan, PlanError> {
  let graph = DependencyGraph::build(model)?;

  let declared: HashSet<&str> = model.resources.iter().map(|r| r.id()).collect();
  let removed: Vec<String> = state
    .resources
    .keys()
    .filter(|id| !declared.contains(id.as_str()))
    .cloned()
    .collect();

  let mut entries = delete_entries(state, &removed);
  let offset = entries.len();

  let mut known = HashSet::new();
  for (wave, ids) in graph.waves().into_iter().enumerate() {
    for id in ids {
      let Some(resource) = model.get(&id) else {
        continue;
      };

      let resolver = StateResolver::restricted(state, env, &known);
      let resolved =
        partially_resolve(resource.kind(), &resource.attributes, &resolver).map_err(|source| PlanError::Resolve {
          address: resource.address.clone(),
          source,
        })?;

      let prior = state.get(&id);
      let (action, changes) = classify(resource.kind(), prior, &resolved);

      let pending: BTreeSet<String> = resolved
        .values()
        .filter_map(|r| match r {
          Resolution::Pending(symbols) => Some(symbols.iter().cloned()),
          Resolution::Known(_) => None,
        })
        .flatten()
        .collect();

      debug!(address = %resource.address, %action, pending = pending.len(), "planned resource");

      known.extend(settled_outputs(&id, resource.kind(), prior, action, &changes));

      entries.push(PlanEntry {
        address: resource.address.clone(),
        action,
        wave: offset + wave,
        desired: Some(resource.attributes.clone()),
        before: prior.map(|p| p.attributes.clone()),
        changes,
        depends_on: graph.dependencies(&id),
        pending: pending.into_iter().collect(),
        prior_physical_id: prior.map(|p| p.physical_id.clone()),
      });
    }
  }

  let plan = Plan {
    stack: model.stack.clone(),
    state_serial: state.serial,
    environment: env.clone(),
    entries,
    outputs: model.outputs.clone(),
  };

  info!(stack = %plan.stack, summary = %plan.summary(), "plan computed");
  Ok(plan)
}

/// Recorded outputs of `id` that keep their value through `action`, as
/// `<id>.<attribute>` symbols. An in-place update never touches replace keys,
/// so only outputs derived from a changed attribute become pending.
fn settled_outputs(
  id: &str,
  kind: ResourceKind,
  prior: Option<&ResourceState>,
  action: ChangeAction,
  changes: &[AttributeChange],
) -> Vec<String> {
  let Some(prior) = prior else {
    return Vec::new();
  };
  let unsettled: HashSet<&str> = match action {
    ChangeAction::NoOp => HashSet::new(),
    ChangeAction::Update => changes
      .iter()
      .flat_map(|c| kind.outputs_derived_from(&c.key))
      .copied()
      .collect(),
    ChangeAction::Create | ChangeAction::Replace | ChangeAction::Delete => return Vec::new(),
  };
  prior
    .outputs
    .keys()
    .filter(|key| !unsettled.contains(key.as_str()))
    .map(|key| format!("{id}.{key}"))
    .collect()
}

/// A plan that deletes everything recorded in `state`.
pub fn plan_destroy(state: &StateFile, env: &Environment) -> Plan {
  let ids: Vec<String> = state.resources.keys().cloned().collect();
  Plan {
    stack: state.stack.clone(),
    state_serial: state.serial,
    environment: env.clone(),
    entries: delete_entries(state, &ids),
    outputs: Vec::new(),
  }
}

fn delete_entries(state: &StateFile, ids: &[String]) -> Vec<PlanEntry> {
  teardown_order(state, ids)
    .into_iter()
    .enumerate()
    .filter_map(|(wave, id)| {
      let prior = state.get(&id)?;
      Some(PlanEntry {
        address: ResourceAddress::new(prior.kind, &id),
        action: ChangeAction::Delete,
        wave,
        desired: None,
        before: Some(prior.attributes.clone()),
        changes: prior
          .attributes
          .iter()
          .map(|(key, value)| AttributeChange {
            key: key.clone(),
            before: Some(value.clone()),
            after: AfterValue::Removed,
            forces_replace: false,
          })
          .collect(),
        depends_on: prior.depends_on.clone(),
        pending: Vec::new(),
        prior_physical_id: Some(prior.physical_id.clone()),
      })
    })
    .collect()
}

/// Order `ids` so that every resource comes before the resources it depended
/// on when it was applied. Ties break on logical id.
pub fn teardown_order(state: &StateFile, ids: &[String]) -> Vec<String> {
  let selected: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
  let mut remaining = selected.clone();
  let mut order = Vec::with_capacity(selected.len());

  // A resource is ready once nothing still remaining depends on it.
  let depends_on = |id: &str| -> Vec<&str> {
    state
      .get(id)
      .map(|r| r.depends_on.iter().map(String::as_str).collect())
      .unwrap_or_default()
  };

  while !remaining.is_empty() {
    let blocked: HashSet<&str> = remaining.iter().flat_map(|id| depends_on(*id)).collect();
    let ready: Vec<&str> = remaining.iter().copied().filter(|id| !blocked.contains(id)).collect();

    // Recorded dependencies should never be cyclic; fall back to id order if they are.
    let ready = if ready.is_empty() {
      remaining.iter().copied().take(1).collect()
    } else {
      ready
    };

    for id in ready {
      remaining.remove(id);
      order.push(id.to_string());
    }
  }

  order
}

/// Plan-time rendering of an attribute change, for listings.
pub fn render_after(after: &AfterValue) -> String {
  match after {
    AfterValue::Known(Value::String(s)) => format!("{s:?}"),
    AfterValue::Known(value) => value.to_string(),
    AfterValue::Pending => "(known after apply)".to_string(),
    AfterValue::Removed => "(removed)".to_string(),
  }
}
