//! Access policy documents.
//!
//! Documents use the familiar JSON statement shape (`Version`, `Statement`
//! array with `Sid`, `Effect`, `Principal`, `Action`, `Resource`, `Condition`)
//! and round-trip through serde without changing it, so a document loaded from
//! disk serialises back to the same structure. Keys outside that shape, such as
//! `NotAction` or `NotPrincipal`, are rejected when the document is loaded.
//!
//! Loading happens at declaration time. Binding happens later: resource
//! patterns usually name another resource through a `$${ref:...}` placeholder,
//! which only resolves once that resource exists. [`resolve`] is called again
//! every time more of the stack becomes known.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::placeholder::{self, PlaceholderError, Resolver};

#[derive(Debug, Error)]
pub enum PolicyError {
  #[error("failed to read policy document {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid policy document: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("exactly one of `document` or `document_path` must be set")]
  Source,

  #[error("policy document has no statements")]
  NoStatements,

  #[error("statement {statement} has no {field}")]
  EmptyField { statement: String, field: &'static str },

  #[error("statement {statement} references unresolved {symbol}")]
  UnresolvedReference { statement: String, symbol: String },

  #[error("statement {statement}: {source}")]
  Placeholder {
    statement: String,
    #[source]
    source: PlaceholderError,
  },
}

/// A policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
  #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,

  #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,

  #[serde(rename = "Statement")]
  pub statements: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyStatement {
  #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
  pub sid: Option<String>,

  #[serde(rename = "Effect")]
  pub effect: Effect,

  #[serde(rename = "Principal")]
  pub principal: Principal,

  #[serde(rename = "Action")]
  pub actions: OneOrMany,

  #[serde(rename = "Resource")]
  pub resources: OneOrMany,

  #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
  Allow,
  Deny,
}

/// Either `"*"` or a map such as `{"AWS": ["arn:..."]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
  Name(String),
  Map(BTreeMap<String, OneOrMany>),
}

impl Principal {
  /// True when the principal grants access to everyone.
  pub fn is_public(&self) -> bool {
    match self {
      Principal::Name(name) => name == "*",
      Principal::Map(map) => map
        .get("AWS")
        .is_some_and(|values| values.iter().any(|v| v == "*")),
    }
  }
}

/// A string or a list of strings, serialised back in the shape it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
  One(String),
  Many(Vec<String>),
}

impl OneOrMany {
  pub fn iter(&self) -> impl Iterator<Item = &String> {
    match self {
      OneOrMany::One(value) => std::slice::from_ref(value).iter(),
      OneOrMany::Many(values) => values.iter(),
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      OneOrMany::One(value) => value.is_empty(),
      OneOrMany::Many(values) => values.iter().all(|v| v.is_empty()),
    }
  }

  fn try_map<E>(&self, mut f: impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
    Ok(match self {
      OneOrMany::One(value) => OneOrMany::One(f(value)?),
      OneOrMany::Many(values) => OneOrMany::Many(values.iter().map(|v| f(v)).collect::<Result<_, _>>()?),
    })
  }
}

impl PolicyStatement {
  /// Label used in error messages: the `Sid` when present, else the position.
  pub fn label(&self, index: usize) -> String {
    match &self.sid {
      Some(sid) => sid.clone(),
      None => format!("#{index}"),
    }
  }

  /// True when this statement allows access to everyone.
  pub fn grants_public_access(&self) -> bool {
    self.effect == Effect::Allow && self.principal.is_public()
  }
}

impl PolicyDocument {
  pub fn from_value(value: Value) -> Result<Self, PolicyError> {
    serde_json::from_value(value).map_err(PolicyError::Parse)
  }

  pub fn to_value(&self) -> Value {
    // Serialising plain strings and maps cannot fail.
    serde_json::to_value(self).unwrap_or(Value::Null)
  }

  /// Check the structural rules every attachable document must satisfy.
  pub fn check(&self) -> Result<(), PolicyError> {
    if self.statements.is_empty() {
      return Err(PolicyError::NoStatements);
    }
    for (index, statement) in self.statements.iter().enumerate() {
      if statement.actions.is_empty() {
        return Err(PolicyError::EmptyField {
          statement: statement.label(index),
          field: "Action",
        });
      }
      if statement.resources.is_empty() {
        return Err(PolicyError::EmptyField {
          statement: statement.label(index),
          field: "Resource",
        });
      }
    }
    Ok(())
  }

  pub fn grants_public_access(&self) -> bool {
    self.statements.iter().any(PolicyStatement::grants_public_access)
  }
}

/// Load a policy document from an inline value or a JSON file.
///
/// Relative paths are resolved against `base_dir`, the directory of the
/// desired-state file that declared the policy.
pub fn load_document(
  inline: Option<&Value>,
  document_path: Option<&Path>,
  base_dir: &Path,
) -> Result<PolicyDocument, PolicyError> {
  match (inline, document_path) {
    (Some(value), None) => PolicyDocument::from_value(value.clone()),
    (None, Some(path)) => {
      let path = if path.is_absolute() {
        path.to_path_buf()
      } else {
        base_dir.join(path)
      };
      debug!(path = %path.display(), "loading policy document");
      let content = fs::read_to_string(&path).map_err(|source| PolicyError::Read {
        path: path.clone(),
        source,
      })?;
      serde_json::from_str(&content).map_err(PolicyError::Parse)
    }
    _ => Err(PolicyError::Source),
  }
}

/// Bind every placeholder in the document using what is known so far.
///
/// Fails with [`PolicyError::UnresolvedReference`] naming the first symbol
/// that is not known yet.
pub fn resolve(document: &PolicyDocument, resolver: &impl Resolver) -> Result<PolicyDocument, PolicyError> {
  let mut statements = Vec::with_capacity(document.statements.len());

  for (index, statement) in document.statements.iter().enumerate() {
    let bind =
      |input: &str| placeholder::substitute(input, resolver).map_err(|source| bind_error(statement.label(index), source));

    let principal = match &statement.principal {
      Principal::Name(name) => Principal::Name(bind(name)?),
      Principal::Map(map) => {
        let mut bound = BTreeMap::new();
        for (key, values) in map {
          bound.insert(key.clone(), values.try_map(bind)?);
        }
        Principal::Map(bound)
      }
    };

    statements.push(PolicyStatement {
      sid: statement.sid.clone(),
      effect: statement.effect,
      principal,
      actions: statement.actions.try_map(bind)?,
      resources: statement.resources.try_map(bind)?,
      condition: match &statement.condition {
        Some(condition) => Some(
          placeholder::substitute_value(condition, resolver)
            .map_err(|source| bind_error(statement.label(index), source))?,
        ),
        None => None,
      },
    });
  }

  Ok(PolicyDocument {
    version: document.version.clone(),
    id: document.id.clone(),
    statements,
  })
}

fn bind_error(statement: String, source: PlaceholderError) -> PolicyError {
  match source.unresolved_symbol() {
    Some(symbol) => PolicyError::UnresolvedReference { statement, symbol },
    None => PolicyError::Placeholder { statement, source },
  }
}

/// [`resolve`] for a document stored as an attribute value.
pub fn resolve_value(value: &Value, resolver: &impl Resolver) -> Result<Value, PolicyError> {
  let document = PolicyDocument::from_value(value.clone())?;
  Ok(resolve(&document, resolver)?.to_value())
}
