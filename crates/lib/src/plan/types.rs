use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Environment;
use crate::execute::resolver::ResolveError;
use crate::graph::GraphError;
use crate::model::{Attributes, OutputDecl, ResourceAddress};
use crate::util::hash::{HashError, Hashable, ObjectHash};

#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("{address}: {source}")]
  Resolve {
    address: ResourceAddress,
    #[source]
    source: ResolveError,
  },

  #[error("plan is stale: it was made against state serial {planned}, current state serial is {current}")]
  Stale { planned: u64, current: u64 },

  #[error("plan is for stack '{planned}', not '{current}'")]
  WrongStack { planned: String, current: String },

  #[error("failed to read plan {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write plan {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid plan file: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("plan file content does not match its id {expected} (computed {actual})")]
  Tampered { expected: String, actual: String },

  #[error("failed to hash plan: {0}")]
  Hash(#[source] HashError),
}

/// What the executor does with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeAction {
  Create,
  Update,
  Replace,
  Delete,
  NoOp,
}

impl ChangeAction {
  pub fn as_str(self) -> &'static str {
    match self {
      ChangeAction::Create => "create",
      ChangeAction::Update => "update",
      ChangeAction::Replace => "replace",
      ChangeAction::Delete => "delete",
      ChangeAction::NoOp => "no-op",
    }
  }

  /// Terminal symbol for plan listings.
  pub fn symbol(self) -> &'static str {
    match self {
      ChangeAction::Create => "+",
      ChangeAction::Update => "~",
      ChangeAction::Replace => "-/+",
      ChangeAction::Delete => "-",
      ChangeAction::NoOp => " ",
    }
  }
}

impl fmt::Display for ChangeAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The planned value of an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum AfterValue {
  Known(Value),
  /// Depends on a resource that has not converged yet ("known after apply").
  Pending,
  Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
  pub key: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub before: Option<Value>,
  pub after: AfterValue,
  #[serde(default)]
  pub forces_replace: bool,
}

/// One entry of the change-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
  pub address: ResourceAddress,
  pub action: ChangeAction,
  /// Entries sharing a wave have no ordering edge between them.
  pub wave: usize,
  /// Declared attribute templates; absent for deletes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub desired: Option<Attributes>,
  /// Last-applied attributes; absent for creates.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub before: Option<Attributes>,
  #[serde(default)]
  pub changes: Vec<AttributeChange>,
  #[serde(default)]
  pub depends_on: Vec<String>,
  /// Reference symbols still unresolved at plan time.
  #[serde(default)]
  pub pending: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub prior_physical_id: Option<String>,
}

impl PlanEntry {
  pub fn id(&self) -> &str {
    &self.address.id
  }

  pub fn is_noop(&self) -> bool {
    self.action == ChangeAction::NoOp
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
  pub create: usize,
  pub update: usize,
  pub replace: usize,
  pub delete: usize,
  pub unchanged: usize,
}

impl fmt::Display for PlanSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
      self.create, self.update, self.replace, self.delete, self.unchanged
    )
  }
}

/// A deterministic change-set for one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
  pub stack: String,
  /// Serial of the state this plan was computed against.
  pub state_serial: u64,
  pub environment: Environment,
  pub entries: Vec<PlanEntry>,
  #[serde(default)]
  pub outputs: Vec<OutputDecl>,
}

impl Hashable for Plan {}

#[derive(Serialize, Deserialize)]
struct SavedPlan {
  id: String,
  plan: Plan,
}

impl Plan {
  pub fn id(&self) -> Result<ObjectHash, PlanError> {
    self.compute_hash().map_err(PlanError::Hash)
  }

  pub fn summary(&self) -> PlanSummary {
    let mut summary = PlanSummary::default();
    for entry in &self.entries {
      match entry.action {
        ChangeAction::Create => summary.create += 1,
        ChangeAction::Update => summary.update += 1,
        ChangeAction::Replace => summary.replace += 1,
        ChangeAction::Delete => summary.delete += 1,
        ChangeAction::NoOp => summary.unchanged += 1,
      }
    }
    summary
  }

  pub fn has_changes(&self) -> bool {
    self.entries.iter().any(|e| !e.is_noop())
  }

  pub fn entry(&self, id: &str) -> Option<&PlanEntry> {
    self.entries.iter().find(|e| e.id() == id)
  }

  /// Entries that change something, in execution order.
  pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
    self.entries.iter().filter(|e| !e.is_noop())
  }

  /// Write the plan and its id as JSON.
  pub fn save(&self, path: &Path) -> Result<ObjectHash, PlanError> {
    let id = self.id()?;
    let saved = SavedPlan {
      id: id.0.clone(),
      plan: self.clone(),
    };
    let content = serde_json::to_string_pretty(&saved).map_err(PlanError::Parse)?;
    fs::write(path, content).map_err(|source| PlanError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(id)
  }

  /// Read a saved plan, verifying that its content still matches its id.
  pub fn load(path: &Path) -> Result<Self, PlanError> {
    let content = fs::read_to_string(path).map_err(|source| PlanError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let saved: SavedPlan = serde_json::from_str(&content).map_err(PlanError::Parse)?;
    let actual = saved.plan.id()?;
    if actual.0 != saved.id {
      return Err(PlanError::Tampered {
        expected: saved.id,
        actual: actual.0,
      });
    }
    Ok(saved.plan)
  }

  /// Reject a saved plan that no longer matches the current state.
  pub fn check_current(&self, stack: &str, state_serial: u64) -> Result<(), PlanError> {
    if self.stack != stack {
      return Err(PlanError::WrongStack {
        planned: self.stack.clone(),
        current: stack.to_string(),
      });
    }
    if self.state_serial != state_serial {
      return Err(PlanError::Stale {
        planned: self.state_serial,
        current: state_serial,
      });
    }
    Ok(())
  }
}
