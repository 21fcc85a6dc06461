//! Output export.
//!
//! Outputs are string templates evaluated against the state after an apply,
//! e.g. `http://$${ref:prod:website_domain}/`. The result is a flat
//! name -> value mapping.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Environment;
use crate::execute::resolver::StateResolver;
use crate::model::OutputDecl;
use crate::placeholder::{self, PlaceholderError};
use crate::state::StateFile;

#[derive(Debug, Error)]
pub enum OutputError {
  /// The output references a resource that never converged.
  #[error("output {output} depends on {symbol}, which has not converged")]
  Unresolved { output: String, symbol: String },

  #[error("output {output}: {source}")]
  Placeholder {
    output: String,
    #[source]
    source: PlaceholderError,
  },
}

impl OutputError {
  pub fn output(&self) -> &str {
    match self {
      OutputError::Unresolved { output, .. } | OutputError::Placeholder { output, .. } => output,
    }
  }
}

fn export_one(output: &OutputDecl, resolver: &StateResolver<'_>) -> Result<String, OutputError> {
  placeholder::substitute(&output.value, resolver).map_err(|source| match source.unresolved_symbol() {
    Some(symbol) => OutputError::Unresolved {
      output: output.name.clone(),
      symbol,
    },
    None => OutputError::Placeholder {
      output: output.name.clone(),
      source,
    },
  })
}

/// Evaluate every output; the first one that cannot be resolved is an error.
pub fn export_outputs(
  outputs: &[OutputDecl],
  state: &StateFile,
  env: &Environment,
) -> Result<BTreeMap<String, String>, OutputError> {
  let resolver = StateResolver::new(state, env);
  let mut values = BTreeMap::new();
  for output in outputs {
    values.insert(output.name.clone(), export_one(output, &resolver)?);
  }
  Ok(values)
}

/// Evaluate what can be evaluated after a partial apply, collecting the rest as errors.
pub fn export_available(
  outputs: &[OutputDecl],
  state: &StateFile,
  env: &Environment,
) -> (BTreeMap<String, String>, Vec<OutputError>) {
  let resolver = StateResolver::new(state, env);
  let mut values = BTreeMap::new();
  let mut errors = Vec::new();

  for output in outputs {
    match export_one(output, &resolver) {
      Ok(value) => {
        debug!(output = %output.name, %value, "exported output");
        values.insert(output.name.clone(), value);
      }
      Err(e) => {
        warn!(output = %output.name, error = %e, "output not available");
        errors.push(e);
      }
    }
  }

  (values, errors)
}
