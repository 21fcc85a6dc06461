//! The resource model.
//!
//! Declarations ([`DesiredState`]) are validated and compiled into uniform
//! [`Resource`]s: an address, a declaration index used for stable ordering,
//! and an attribute map. Cross-resource relationships are expressed only
//! through `$${ref:<id>:<attribute>}` placeholders inside attribute values,
//! which the graph builder turns into edges.

mod types;
mod validate;

pub use types::*;
pub use validate::{ValidationError, is_valid_bucket_name, validate_declarations, validate_policies};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::EnvironmentDecl;
use crate::placeholder::{self, Placeholder};
use crate::policy::{self, PolicyDocument};

/// Attribute map of a resource. Ordered, so equal maps serialise identically.
pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
  Bucket,
  BucketPolicy,
  Pipeline,
}

impl ResourceKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ResourceKind::Bucket => "bucket",
      ResourceKind::BucketPolicy => "bucket-policy",
      ResourceKind::Pipeline => "pipeline",
    }
  }

  /// Attributes whose change cannot be applied in place.
  pub fn replace_keys(self) -> &'static [&'static str] {
    match self {
      ResourceKind::Bucket => &["name"],
      ResourceKind::BucketPolicy => &["bucket"],
      ResourceKind::Pipeline => &["name"],
    }
  }

  /// Attributes a provider computes once the resource exists.
  pub fn computed_attributes(self) -> &'static [&'static str] {
    match self {
      ResourceKind::Bucket => &["id", "name", "arn", "region", "website_domain"],
      ResourceKind::BucketPolicy => &["id", "bucket"],
      ResourceKind::Pipeline => &["id", "name", "arn", "region"],
    }
  }

  /// Computed outputs whose value can change when `attribute` is updated in place.
  pub fn outputs_derived_from(self, attribute: &str) -> &'static [&'static str] {
    match (self, attribute) {
      (ResourceKind::Bucket, "website") => &["website_domain"],
      _ => &[],
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Kind plus logical id, e.g. `bucket.prod`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceAddress {
  pub kind: ResourceKind,
  pub id: String,
}

impl ResourceAddress {
  pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
    Self { kind, id: id.into() }
  }
}

impl fmt::Display for ResourceAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.kind, self.id)
  }
}

/// A compiled resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
  pub address: ResourceAddress,
  /// Position in the desired-state file, used as the stable tie-break.
  pub decl_index: usize,
  pub attributes: Attributes,
}

impl Resource {
  pub fn id(&self) -> &str {
    &self.address.id
  }

  pub fn kind(&self) -> ResourceKind {
    self.address.kind
  }

  /// Whether a converged instance of this resource exposes `attribute`.
  pub fn exports(&self, attribute: &str) -> bool {
    if !self.kind().computed_attributes().contains(&attribute) {
      return false;
    }
    match (self.kind(), attribute) {
      (ResourceKind::Bucket, "website_domain") => self.attributes.get("website").is_some_and(|w| !w.is_null()),
      _ => true,
    }
  }

  /// Every `ref` placeholder in the attribute map, in document order.
  pub fn references(&self) -> Vec<(String, String)> {
    let mut refs = Vec::new();
    for value in self.attributes.values() {
      // Attribute templates were parsed during compilation.
      if let Ok(found) = placeholder::collect_placeholders(value) {
        for p in found {
          if let Placeholder::Ref { id, attribute } = p {
            refs.push((id, attribute));
          }
        }
      }
    }
    refs
  }
}

/// The validated, compiled desired state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceModel {
  pub stack: String,
  pub environment: EnvironmentDecl,
  pub resources: Vec<Resource>,
  /// Declared outputs followed by implicit website URL outputs.
  pub outputs: Vec<OutputDecl>,
  /// Declarations as written, kept for the pipeline flow check.
  pub pipelines: Vec<PipelineDecl>,
  pub base_dir: PathBuf,
}

impl ResourceModel {
  /// Validate `desired` and compile it. Policy documents given by path are
  /// read relative to `base_dir`.
  pub fn from_desired(desired: &DesiredState, base_dir: &Path) -> Result<Self, ValidationError> {
    validate_declarations(desired)?;

    let mut documents = BTreeMap::new();
    for decl in &desired.policies {
      let document = policy::load_document(decl.document.as_ref(), decl.document_path.as_deref(), base_dir)
        .map_err(|source| ValidationError::Policy {
          field: format!("policies.{}.document", decl.id),
          source,
        })?;
      documents.insert(decl.id.clone(), document);
    }
    validate_policies(desired, &documents)?;

    let mut resources = Vec::new();

    for bucket in &desired.buckets {
      resources.push(compile_bucket(bucket, resources.len()));
    }
    for decl in &desired.policies {
      if let Some(document) = documents.get(&decl.id) {
        resources.push(compile_policy(decl, document, resources.len()));
      }
    }
    for pipeline in &desired.pipelines {
      resources.push(compile_pipeline(pipeline, resources.len()));
    }

    for resource in &resources {
      check_templates(resource)?;
    }

    let outputs = effective_outputs(desired);
    for output in &outputs {
      check_template(&format!("outputs.{}.value", output.name), &Value::String(output.value.clone()))?;
    }

    Ok(Self {
      stack: desired.stack.clone(),
      environment: desired.environment.clone(),
      resources,
      outputs,
      pipelines: desired.pipelines.clone(),
      base_dir: base_dir.to_path_buf(),
    })
  }

  pub fn get(&self, id: &str) -> Option<&Resource> {
    self.resources.iter().find(|r| r.id() == id)
  }
}

fn ref_template(id: &str, attribute: &str) -> String {
  format!("$${{ref:{id}:{attribute}}}")
}

fn compile_bucket(bucket: &BucketDecl, decl_index: usize) -> Resource {
  let website = match &bucket.website {
    Some(website) => json!({
      "index_document": website.index_document,
      "error_document": website.error_document,
    }),
    None => Value::Null,
  };

  let attributes = Attributes::from([
    ("name".to_string(), json!(bucket.bucket_name())),
    ("versioned".to_string(), json!(bucket.versioned)),
    ("public_access".to_string(), json!(bucket.public_access.as_str())),
    ("website".to_string(), website),
    ("removal_policy".to_string(), json!(bucket.removal_policy.as_str())),
    ("tags".to_string(), json!(bucket.tags)),
  ]);

  Resource {
    address: ResourceAddress::new(ResourceKind::Bucket, &bucket.id),
    decl_index,
    attributes,
  }
}

fn compile_policy(decl: &PolicyDecl, document: &PolicyDocument, decl_index: usize) -> Resource {
  let attributes = Attributes::from([
    ("bucket".to_string(), json!(ref_template(&decl.bucket, "name"))),
    ("document".to_string(), document.to_value()),
  ]);

  Resource {
    address: ResourceAddress::new(ResourceKind::BucketPolicy, &decl.id),
    decl_index,
    attributes,
  }
}

fn compile_pipeline(pipeline: &PipelineDecl, decl_index: usize) -> Resource {
  let stages: Vec<Value> = pipeline
    .stages
    .iter()
    .map(|stage| {
      let actions: Vec<Value> = stage
        .actions
        .iter()
        .map(|action| match action {
          ActionDecl::Source(source) => json!({
            "kind": "source",
            "name": source.name,
            "bucket": ref_template(&source.bucket, "name"),
            "object_key": source.object_key,
            "output": source.output,
            "trigger": source.trigger,
          }),
          ActionDecl::Deploy(deploy) => json!({
            "kind": "deploy",
            "name": deploy.name,
            "bucket": ref_template(&deploy.bucket, "name"),
            "input": deploy.input,
            "extract": deploy.extract,
          }),
        })
        .collect();
      json!({ "name": stage.name, "actions": actions })
    })
    .collect();

  let attributes = Attributes::from([
    ("name".to_string(), json!(pipeline.pipeline_name())),
    ("stages".to_string(), Value::Array(stages)),
  ]);

  Resource {
    address: ResourceAddress::new(ResourceKind::Pipeline, &pipeline.id),
    decl_index,
    attributes,
  }
}

fn check_templates(resource: &Resource) -> Result<(), ValidationError> {
  let section = match resource.kind() {
    ResourceKind::Bucket => "buckets",
    ResourceKind::BucketPolicy => "policies",
    ResourceKind::Pipeline => "pipelines",
  };
  for (key, value) in &resource.attributes {
    check_template(&format!("{section}.{}.{key}", resource.id()), value)?;
  }
  Ok(())
}

fn check_template(field: &str, value: &Value) -> Result<(), ValidationError> {
  let found =
    placeholder::collect_placeholders(value).map_err(|e| ValidationError::invalid(field, e.to_string()))?;
  for p in found {
    if let Placeholder::Env(key) = &p
      && key != "region"
      && key != "account"
    {
      return Err(ValidationError::invalid(
        field,
        format!("unknown environment value '{key}' (expected region or account)"),
      ));
    }
  }
  Ok(())
}

/// `staging-site` becomes `StagingSite`.
pub fn pascal_case(id: &str) -> String {
  id.split(['-', '_'])
    .filter(|part| !part.is_empty())
    .map(|part| {
      let mut chars = part.chars();
      match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
      }
    })
    .collect()
}

/// Declared outputs plus a website URL output for every website bucket.
fn effective_outputs(desired: &DesiredState) -> Vec<OutputDecl> {
  let mut outputs = desired.outputs.clone();
  for bucket in desired.buckets.iter().filter(|b| b.website.is_some()) {
    let name = format!("{}BucketWebsiteURL", pascal_case(&bucket.id));
    if outputs.iter().any(|o| o.name == name) {
      continue;
    }
    outputs.push(OutputDecl {
      name,
      value: format!("http://{}/", ref_template(&bucket.id, "website_domain")),
      description: Some(format!("Website URL of bucket {}", bucket.id)),
    });
  }
  outputs
}
