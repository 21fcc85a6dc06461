//! Desired-state declarations as read from a stack file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EnvironmentDecl;
use crate::consts::DEFAULT_STACK_NAME;

fn default_stack_name() -> String {
  DEFAULT_STACK_NAME.to_string()
}

fn default_true() -> bool {
  true
}

/// The complete declarative description of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredState {
  #[serde(default = "default_stack_name")]
  pub stack: String,
  #[serde(default)]
  pub environment: EnvironmentDecl,
  #[serde(default)]
  pub buckets: Vec<BucketDecl>,
  #[serde(default)]
  pub policies: Vec<PolicyDecl>,
  #[serde(default)]
  pub pipelines: Vec<PipelineDecl>,
  #[serde(default)]
  pub outputs: Vec<OutputDecl>,
}

impl Default for DesiredState {
  fn default() -> Self {
    Self {
      stack: default_stack_name(),
      environment: EnvironmentDecl::default(),
      buckets: Vec::new(),
      policies: Vec::new(),
      pipelines: Vec::new(),
      outputs: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketDecl {
  pub id: String,
  /// Physical bucket name; defaults to the logical id.
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub versioned: bool,
  #[serde(default)]
  pub public_access: PublicAccess,
  #[serde(default)]
  pub website: Option<WebsiteConfig>,
  #[serde(default)]
  pub removal_policy: RemovalPolicy,
  #[serde(default)]
  pub tags: BTreeMap<String, String>,
}

impl BucketDecl {
  pub fn bucket_name(&self) -> &str {
    self.name.as_deref().unwrap_or(&self.id)
  }
}

/// Public-access posture of a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublicAccess {
  /// Public ACLs and public policies are both blocked.
  #[default]
  BlockAll,
  /// Public ACLs are blocked, public bucket policies are allowed.
  BlockAcls,
  /// Nothing is blocked.
  PublicRead,
}

impl PublicAccess {
  pub fn blocks_acls(self) -> bool {
    matches!(self, PublicAccess::BlockAll | PublicAccess::BlockAcls)
  }

  pub fn blocks_public_policies(self) -> bool {
    matches!(self, PublicAccess::BlockAll)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      PublicAccess::BlockAll => "block-all",
      PublicAccess::BlockAcls => "block-acls",
      PublicAccess::PublicRead => "public-read",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebsiteConfig {
  #[serde(default)]
  pub index_document: Option<String>,
  #[serde(default)]
  pub error_document: Option<String>,
}

/// What happens to a bucket when it leaves the stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
  Destroy,
  #[default]
  Retain,
}

impl RemovalPolicy {
  pub fn as_str(self) -> &'static str {
    match self {
      RemovalPolicy::Destroy => "destroy",
      RemovalPolicy::Retain => "retain",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDecl {
  pub id: String,
  /// Logical id of the bucket the policy attaches to.
  pub bucket: String,
  #[serde(default)]
  pub document: Option<Value>,
  #[serde(default)]
  pub document_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDecl {
  pub id: String,
  /// Physical pipeline name; defaults to the logical id.
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub stages: Vec<StageDecl>,
}

impl PipelineDecl {
  pub fn pipeline_name(&self) -> &str {
    self.name.as_deref().unwrap_or(&self.id)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDecl {
  pub name: String,
  #[serde(default)]
  pub actions: Vec<ActionDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionDecl {
  Source(SourceAction),
  Deploy(DeployAction),
}

impl ActionDecl {
  pub fn name(&self) -> &str {
    match self {
      ActionDecl::Source(a) => &a.name,
      ActionDecl::Deploy(a) => &a.name,
    }
  }

  /// Logical id of the bucket the action reads from or writes to.
  pub fn bucket(&self) -> &str {
    match self {
      ActionDecl::Source(a) => &a.bucket,
      ActionDecl::Deploy(a) => &a.bucket,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAction {
  pub name: String,
  pub bucket: String,
  pub object_key: String,
  /// Name of the artifact this action produces.
  pub output: String,
  #[serde(default)]
  pub trigger: TriggerMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployAction {
  pub name: String,
  pub bucket: String,
  /// Name of the artifact this action consumes.
  pub input: String,
  #[serde(default = "default_true")]
  pub extract: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
  #[default]
  Events,
  Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDecl {
  pub name: String,
  /// String template; usually references a resource attribute.
  pub value: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}
