//! Placeholder resolution against recorded state.
//!
//! The same resolver serves planning and execution. While planning, only
//! outputs that the plan leaves untouched count as known; everything else is
//! "known after apply". While executing, every output recorded in the live
//! state is known.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::Value;
use thiserror::Error;

use crate::config::Environment;
use crate::model::{Attributes, ResourceKind};
use crate::placeholder::{self, PlaceholderError, Resolver};
use crate::policy::{self, PolicyError};
use crate::state::StateFile;

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  Placeholder(#[from] PlaceholderError),

  #[error(transparent)]
  Policy(#[from] PolicyError),
}

impl ResolveError {
  /// The unresolved symbol, if resolution failed on a missing reference.
  pub fn unresolved_symbol(&self) -> Option<String> {
    match self {
      ResolveError::Placeholder(e) => e.unresolved_symbol(),
      ResolveError::Policy(PolicyError::UnresolvedReference { symbol, .. }) => Some(symbol.clone()),
      ResolveError::Policy(_) => None,
    }
  }
}

/// Resolves `ref` placeholders from computed outputs recorded in state.
pub struct StateResolver<'a> {
  state: &'a StateFile,
  env: &'a Environment,
  known: Option<&'a HashSet<String>>,
}

impl<'a> StateResolver<'a> {
  /// Every resource in `state` is known.
  pub fn new(state: &'a StateFile, env: &'a Environment) -> Self {
    Self { state, env, known: None }
  }

  /// Only outputs whose `<id>.<attribute>` symbol is in `known` resolve; the rest are pending.
  pub fn restricted(state: &'a StateFile, env: &'a Environment, known: &'a HashSet<String>) -> Self {
    Self {
      state,
      env,
      known: Some(known),
    }
  }
}

impl Resolver for StateResolver<'_> {
  fn resolve_ref(&self, id: &str, attribute: &str) -> Result<&str, PlaceholderError> {
    let visible = self
      .known
      .is_none_or(|known| known.contains(&format!("{id}.{attribute}")));
    self
      .state
      .output(id, attribute)
      .filter(|_| visible)
      .ok_or_else(|| PlaceholderError::UnresolvedRef {
        id: id.to_string(),
        attribute: attribute.to_string(),
      })
  }

  fn resolve_env(&self, key: &str) -> Result<&str, PlaceholderError> {
    self
      .env
      .get(key)
      .ok_or_else(|| PlaceholderError::UnknownEnv(key.to_string()))
  }
}

/// Plan-time value of one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
  Known(Value),
  Pending(BTreeSet<String>),
}

/// Resolve one attribute. Bucket-policy documents go through the policy loader.
pub fn resolve_attribute(
  kind: ResourceKind,
  key: &str,
  value: &Value,
  resolver: &impl Resolver,
) -> Result<Value, ResolveError> {
  if kind == ResourceKind::BucketPolicy && key == "document" {
    return Ok(policy::resolve_value(value, resolver)?);
  }
  Ok(placeholder::substitute_value(value, resolver)?)
}

/// Resolve every attribute; any unresolved reference is an error.
pub fn resolve_attributes(
  kind: ResourceKind,
  attributes: &Attributes,
  resolver: &impl Resolver,
) -> Result<Attributes, ResolveError> {
  let mut resolved = Attributes::new();
  for (key, value) in attributes {
    resolved.insert(key.clone(), resolve_attribute(kind, key, value, resolver)?);
  }
  Ok(resolved)
}

/// Resolve what is known now and mark the rest as pending.
pub fn partially_resolve(
  kind: ResourceKind,
  attributes: &Attributes,
  resolver: &impl Resolver,
) -> Result<BTreeMap<String, Resolution>, ResolveError> {
  let mut resolved = BTreeMap::new();
  for (key, value) in attributes {
    let missing = placeholder::unresolved_refs(value, resolver)?;
    let resolution = if missing.is_empty() {
      Resolution::Known(resolve_attribute(kind, key, value, resolver)?)
    } else {
      Resolution::Pending(missing)
    };
    resolved.insert(key.clone(), resolution);
  }
  Ok(resolved)
}
