use std::collections::BTreeMap;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::STATE_FORMAT_VERSION;
use crate::model::{Attributes, RemovalPolicy, ResourceAddress, ResourceKind};

/// Current version of the state index format.
pub const STATE_INDEX_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to create state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read state: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write state: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported state format version {0}")]
  UnsupportedVersion(u32),

  #[error("state snapshot not found: {0}")]
  NotFound(String),

  #[error("state belongs to stack '{found}', expected '{expected}'")]
  StackMismatch { expected: String, found: String },
}

/// Last-applied state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
  pub kind: ResourceKind,
  pub physical_id: String,
  /// Attributes as they were sent to the provider, fully resolved.
  pub attributes: Attributes,
  /// Computed attributes reported by the provider.
  #[serde(default)]
  pub outputs: BTreeMap<String, String>,
  /// Logical ids this resource depended on when it was applied.
  #[serde(default)]
  pub depends_on: Vec<String>,
}

impl ResourceState {
  pub fn removal_policy(&self) -> RemovalPolicy {
    match self.attributes.get("removal_policy").and_then(|v| v.as_str()) {
      Some("retain") => RemovalPolicy::Retain,
      _ => RemovalPolicy::Destroy,
    }
  }
}

/// The persisted "last known state" of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
  pub version: u32,
  pub stack: String,
  /// Incremented on every checkpoint.
  pub serial: u64,
  #[serde(default)]
  pub resources: BTreeMap<String, ResourceState>,
  #[serde(default)]
  pub outputs: BTreeMap<String, String>,
}

impl StateFile {
  pub fn new(stack: impl Into<String>) -> Self {
    Self {
      version: STATE_FORMAT_VERSION,
      stack: stack.into(),
      serial: 0,
      resources: BTreeMap::new(),
      outputs: BTreeMap::new(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }

  pub fn get(&self, id: &str) -> Option<&ResourceState> {
    self.resources.get(id)
  }

  pub fn address(&self, id: &str) -> Option<ResourceAddress> {
    self.resources.get(id).map(|r| ResourceAddress::new(r.kind, id))
  }

  /// A computed attribute of a recorded resource.
  pub fn output(&self, id: &str, attribute: &str) -> Option<&str> {
    self
      .resources
      .get(id)
      .and_then(|r| r.outputs.get(attribute))
      .map(String::as_str)
  }

  pub fn record(&mut self, id: impl Into<String>, resource: ResourceState) {
    self.resources.insert(id.into(), resource);
    self.serial += 1;
  }

  pub fn forget(&mut self, id: &str) -> Option<ResourceState> {
    let removed = self.resources.remove(id);
    if removed.is_some() {
      self.serial += 1;
    }
    removed
  }

  pub fn set_outputs(&mut self, outputs: BTreeMap<String, String>) {
    if self.outputs != outputs {
      self.outputs = outputs;
      self.serial += 1;
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
  pub id: String,
  pub created_at: u64,
  pub serial: u64,
  pub resource_count: usize,
}

/// Snapshot list plus the current pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateIndex {
  pub version: u32,
  pub snapshots: Vec<SnapshotMetadata>,
  pub current: Option<String>,
}

impl Default for StateIndex {
  fn default() -> Self {
    Self::new()
  }
}

impl StateIndex {
  pub fn new() -> Self {
    Self {
      version: STATE_INDEX_VERSION,
      snapshots: Vec::new(),
      current: None,
    }
  }

  pub fn len(&self) -> usize {
    self.snapshots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.snapshots.is_empty()
  }

  /// Insert or replace the metadata for a snapshot, keeping chronological order.
  pub fn upsert(&mut self, metadata: SnapshotMetadata) {
    self.snapshots.retain(|s| s.id != metadata.id);
    self.snapshots.push(metadata);
    self.snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
  }

  pub fn remove(&mut self, id: &str) {
    self.snapshots.retain(|s| s.id != id);
    if self.current.as_deref() == Some(id) {
      self.current = None;
    }
  }

  pub fn set_current(&mut self, id: &str) -> Result<(), StateError> {
    if !self.snapshots.iter().any(|s| s.id == id) {
      return Err(StateError::NotFound(id.to_string()));
    }
    self.current = Some(id.to_string());
    Ok(())
  }
}

pub(crate) fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or_default()
}

/// Snapshot ids are creation times in milliseconds, hex encoded.
pub fn generate_snapshot_id() -> String {
  format!("{:012x}", now_millis())
}
