//! Per-resource attribute diffing.

use std::collections::{BTreeMap, BTreeSet};

use crate::execute::resolver::Resolution;
use crate::model::ResourceKind;
use crate::state::ResourceState;

use super::types::{AfterValue, AttributeChange, ChangeAction};

/// Classify a resource given its prior state and plan-time attribute values.
///
/// - absent from state: create
/// - recorded with another kind, or a replace-required attribute changes: replace
/// - any other attribute change (including a pending one): update
/// - otherwise: no-op
pub fn classify(
  kind: ResourceKind,
  prior: Option<&ResourceState>,
  resolved: &BTreeMap<String, Resolution>,
) -> (ChangeAction, Vec<AttributeChange>) {
  let Some(prior) = prior else {
    let changes = resolved
      .iter()
      .map(|(key, resolution)| AttributeChange {
        key: key.clone(),
        before: None,
        after: after_value(resolution),
        forces_replace: false,
      })
      .collect();
    return (ChangeAction::Create, changes);
  };

  let kind_changed = prior.kind != kind;
  let keys: BTreeSet<&String> = resolved.keys().chain(prior.attributes.keys()).collect();
  let mut changes = Vec::new();

  for key in keys {
    let before = prior.attributes.get(key.as_str());
    let after = match resolved.get(key.as_str()) {
      Some(Resolution::Known(value)) if !kind_changed && before == Some(value) => continue,
      Some(resolution) => after_value(resolution),
      None => AfterValue::Removed,
    };
    changes.push(AttributeChange {
      key: key.clone(),
      before: before.cloned(),
      after,
      forces_replace: kind_changed || kind.replace_keys().contains(&key.as_str()),
    });
  }

  let action = if kind_changed || changes.iter().any(|c| c.forces_replace) {
    ChangeAction::Replace
  } else if changes.is_empty() {
    ChangeAction::NoOp
  } else {
    ChangeAction::Update
  };

  (action, changes)
}

fn after_value(resolution: &Resolution) -> AfterValue {
  match resolution {
    Resolution::Known(value) => AfterValue::Known(value.clone()),
    Resolution::Pending(_) => AfterValue::Pending,
  }
}
