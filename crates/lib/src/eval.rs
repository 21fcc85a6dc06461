//! Desired-state file evaluation.
//!
//! This module provides the `evaluate_config` function which takes a path to
//! a YAML or JSON desired-state file and returns the parsed declarations
//! together with the directory relative paths inside it are resolved against.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::model::DesiredState;

/// Errors that can occur during config evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
  #[error("desired-state file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid YAML in {path}: {source}")]
  Yaml {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid JSON in {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("unsupported desired-state file {0} (expected .yaml, .yml or .json)")]
  UnsupportedFormat(PathBuf),
}

/// A parsed desired-state file.
#[derive(Debug, Clone)]
pub struct EvaluatedConfig {
  pub desired: DesiredState,
  /// Directory of the file; `document_path` entries are relative to it.
  pub base_dir: PathBuf,
  pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
  Yaml,
  Json,
}

fn format_of(path: &Path) -> Option<Format> {
  match path.extension().and_then(|e| e.to_str()) {
    Some("yaml" | "yml") => Some(Format::Yaml),
    Some("json") => Some(Format::Json),
    _ => None,
  }
}

/// Parse desired-state content in the given format.
pub fn parse_desired(content: &str, path: &Path) -> Result<DesiredState, EvalError> {
  match format_of(path).ok_or_else(|| EvalError::UnsupportedFormat(path.to_path_buf()))? {
    Format::Yaml => serde_yaml::from_str(content).map_err(|source| EvalError::Yaml {
      path: path.to_path_buf(),
      source,
    }),
    Format::Json => serde_json::from_str(content).map_err(|source| EvalError::Json {
      path: path.to_path_buf(),
      source,
    }),
  }
}

/// Read and parse a desired-state file.
pub fn evaluate_config(path: &Path) -> Result<EvaluatedConfig, EvalError> {
  if !path.exists() {
    return Err(EvalError::NotFound(path.to_path_buf()));
  }

  let path = dunce::canonicalize(path).map_err(|source| EvalError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  debug!(path = %path.display(), "reading desired state");

  let content = fs::read_to_string(&path).map_err(|source| EvalError::Read {
    path: path.clone(),
    source,
  })?;
  let desired = parse_desired(&content, &path)?;

  let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

  info!(
    stack = %desired.stack,
    buckets = desired.buckets.len(),
    policies = desired.policies.len(),
    pipelines = desired.pipelines.len(),
    "evaluated desired state"
  );

  Ok(EvaluatedConfig { desired, base_dir, path })
}
