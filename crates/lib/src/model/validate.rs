//! Structural validation of declarations.
//!
//! Everything here runs before any planning: a desired state that fails
//! validation never reaches a provider.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::policy::{PolicyDocument, PolicyError};

use super::types::{ActionDecl, DesiredState, WebsiteConfig};

/// A malformed desired state. Every variant names the offending field.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("{field}: {message}")]
  Invalid { field: String, message: String },

  #[error("{field}: duplicate value '{value}'")]
  Duplicate { field: String, value: String },

  #[error("{field}: {source}")]
  Policy {
    field: String,
    #[source]
    source: PolicyError,
  },

  #[error("failed to read desired state {path}: {message}")]
  Load { path: String, message: String },
}

impl ValidationError {
  pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
    ValidationError::Invalid {
      field: field.into(),
      message: message.into(),
    }
  }

  fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
    ValidationError::Duplicate {
      field: field.into(),
      value: value.into(),
    }
  }

  /// Dotted path of the field at fault.
  pub fn field(&self) -> &str {
    match self {
      ValidationError::Invalid { field, .. }
      | ValidationError::Duplicate { field, .. }
      | ValidationError::Policy { field, .. } => field,
      ValidationError::Load { path, .. } => path,
    }
  }
}

fn is_identifier(value: &str) -> bool {
  !value.is_empty()
    && value
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Bucket names: 3 to 63 characters of lowercase letters, digits, `-` and `.`,
/// starting and ending with a letter or digit.
pub fn is_valid_bucket_name(name: &str) -> bool {
  let bytes = name.as_bytes();
  (3..=63).contains(&bytes.len())
    && bytes
      .iter()
      .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
    && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
    && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
}

fn check_document_path(field: String, value: &str) -> Result<(), ValidationError> {
  if value.is_empty() {
    return Err(ValidationError::invalid(field, "must not be empty"));
  }
  if value.starts_with('/') {
    return Err(ValidationError::invalid(field, "must be relative to the bucket root"));
  }
  if value.chars().any(char::is_whitespace) {
    return Err(ValidationError::invalid(field, "must not contain whitespace"));
  }
  Ok(())
}

fn check_website(bucket_id: &str, website: &WebsiteConfig) -> Result<(), ValidationError> {
  let field = format!("buckets.{bucket_id}.website.index_document");
  match &website.index_document {
    Some(index) => check_document_path(field, index)?,
    None => {
      return Err(ValidationError::invalid(
        field,
        "website hosting requires an index document",
      ));
    }
  }
  if let Some(error) = &website.error_document {
    check_document_path(format!("buckets.{bucket_id}.website.error_document"), error)?;
  }
  Ok(())
}

/// Validate every declaration that can be checked without loading policy documents.
pub fn validate_declarations(desired: &DesiredState) -> Result<(), ValidationError> {
  if !is_identifier(&desired.stack) {
    return Err(ValidationError::invalid(
      "stack",
      "must be non-empty and contain only letters, digits, '-' and '_'",
    ));
  }

  let mut ids = HashSet::new();
  let declared_ids = desired
    .buckets
    .iter()
    .map(|b| ("buckets", &b.id))
    .chain(desired.policies.iter().map(|p| ("policies", &p.id)))
    .chain(desired.pipelines.iter().map(|p| ("pipelines", &p.id)));

  for (index, (section, id)) in declared_ids.enumerate() {
    if !is_identifier(id) {
      return Err(ValidationError::invalid(
        format!("{section}[{index}].id"),
        format!("'{id}' must be non-empty and contain only letters, digits, '-' and '_'"),
      ));
    }
    if !ids.insert(id.as_str()) {
      return Err(ValidationError::duplicate(format!("{section}.{id}.id"), id.as_str()));
    }
  }

  let bucket_ids: HashSet<&str> = desired.buckets.iter().map(|b| b.id.as_str()).collect();

  let mut bucket_names = HashSet::new();
  for bucket in &desired.buckets {
    let name = bucket.bucket_name();
    if !is_valid_bucket_name(name) {
      return Err(ValidationError::invalid(
        format!("buckets.{}.name", bucket.id),
        format!("'{name}' is not a valid bucket name"),
      ));
    }
    if !bucket_names.insert(name) {
      return Err(ValidationError::duplicate(format!("buckets.{}.name", bucket.id), name));
    }
    if let Some(website) = &bucket.website {
      check_website(&bucket.id, website)?;
    }
    if bucket.tags.keys().any(|k| k.is_empty()) {
      return Err(ValidationError::invalid(
        format!("buckets.{}.tags", bucket.id),
        "tag keys must not be empty",
      ));
    }
  }

  let mut attached = HashMap::new();
  for policy in &desired.policies {
    if policy.bucket.is_empty() {
      return Err(ValidationError::invalid(
        format!("policies.{}.bucket", policy.id),
        "must name a bucket",
      ));
    }
    if !bucket_ids.contains(policy.bucket.as_str()) {
      return Err(ValidationError::invalid(
        format!("policies.{}.bucket", policy.id),
        format!("'{}' is not a declared bucket", policy.bucket),
      ));
    }
    if let Some(previous) = attached.insert(policy.bucket.as_str(), policy.id.as_str()) {
      return Err(ValidationError::invalid(
        format!("policies.{}.bucket", policy.id),
        format!("bucket '{}' already has policy '{previous}'", policy.bucket),
      ));
    }
    if policy.document.is_some() == policy.document_path.is_some() {
      return Err(ValidationError::invalid(
        format!("policies.{}.document", policy.id),
        "exactly one of `document` or `document_path` must be set",
      ));
    }
  }

  for pipeline in &desired.pipelines {
    validate_pipeline(pipeline, &bucket_ids)?;
  }

  let mut output_names = HashSet::new();
  for (index, output) in desired.outputs.iter().enumerate() {
    if output.name.is_empty() {
      return Err(ValidationError::invalid(format!("outputs[{index}].name"), "must not be empty"));
    }
    if !output_names.insert(output.name.as_str()) {
      return Err(ValidationError::duplicate(
        format!("outputs.{}.name", output.name),
        output.name.as_str(),
      ));
    }
  }

  Ok(())
}

fn validate_pipeline(
  pipeline: &super::types::PipelineDecl,
  bucket_ids: &HashSet<&str>,
) -> Result<(), ValidationError> {
  let id = &pipeline.id;

  if pipeline.pipeline_name().is_empty() {
    return Err(ValidationError::invalid(format!("pipelines.{id}.name"), "must not be empty"));
  }
  if pipeline.stages.len() < 2 {
    return Err(ValidationError::invalid(
      format!("pipelines.{id}.stages"),
      "a pipeline needs at least two stages",
    ));
  }

  let mut stage_names = HashSet::new();
  let mut action_names = HashSet::new();
  let mut outputs = HashSet::new();

  for (position, stage) in pipeline.stages.iter().enumerate() {
    if stage.name.is_empty() {
      return Err(ValidationError::invalid(
        format!("pipelines.{id}.stages[{position}].name"),
        "must not be empty",
      ));
    }
    if !stage_names.insert(stage.name.as_str()) {
      return Err(ValidationError::duplicate(
        format!("pipelines.{id}.stages.{}.name", stage.name),
        stage.name.as_str(),
      ));
    }

    let stage_field = format!("pipelines.{id}.stages.{}", stage.name);
    if stage.actions.is_empty() {
      return Err(ValidationError::invalid(
        format!("{stage_field}.actions"),
        "a stage needs at least one action",
      ));
    }

    for action in &stage.actions {
      let action_field = format!("{stage_field}.actions.{}", action.name());
      if action.name().is_empty() {
        return Err(ValidationError::invalid(format!("{stage_field}.actions"), "action name must not be empty"));
      }
      if !action_names.insert(action.name()) {
        return Err(ValidationError::duplicate(format!("{action_field}.name"), action.name()));
      }
      if action.bucket().is_empty() {
        return Err(ValidationError::invalid(format!("{action_field}.bucket"), "must name a bucket"));
      }
      if !bucket_ids.contains(action.bucket()) {
        return Err(ValidationError::invalid(
          format!("{action_field}.bucket"),
          format!("'{}' is not a declared bucket", action.bucket()),
        ));
      }

      match action {
        ActionDecl::Source(source) => {
          if source.object_key.is_empty() {
            return Err(ValidationError::invalid(format!("{action_field}.object_key"), "must not be empty"));
          }
          if source.output.is_empty() {
            return Err(ValidationError::invalid(format!("{action_field}.output"), "must not be empty"));
          }
          if !outputs.insert(source.output.as_str()) {
            return Err(ValidationError::duplicate(format!("{action_field}.output"), source.output.as_str()));
          }
        }
        ActionDecl::Deploy(_) if position == 0 => {
          return Err(ValidationError::invalid(
            format!("{action_field}.kind"),
            "the first stage may only contain source actions",
          ));
        }
        ActionDecl::Deploy(_) => {}
      }
    }
  }

  // Deploy inputs are checked once every produced artifact is known.
  for stage in &pipeline.stages {
    for action in &stage.actions {
      if let ActionDecl::Deploy(deploy) = action
        && !outputs.contains(deploy.input.as_str())
      {
        return Err(ValidationError::invalid(
          format!("pipelines.{id}.stages.{}.actions.{}.input", stage.name, deploy.name),
          format!("no action in the pipeline produces artifact '{}'", deploy.input),
        ));
      }
    }
  }

  Ok(())
}

/// Validate loaded policy documents against their buckets' public-access posture.
pub fn validate_policies(
  desired: &DesiredState,
  documents: &BTreeMap<String, PolicyDocument>,
) -> Result<(), ValidationError> {
  for policy in &desired.policies {
    let Some(document) = documents.get(&policy.id) else {
      continue;
    };
    let field = format!("policies.{}.document", policy.id);

    document.check().map_err(|source| ValidationError::Policy {
      field: field.clone(),
      source,
    })?;

    let Some(bucket) = desired.buckets.iter().find(|b| b.id == policy.bucket) else {
      return Err(ValidationError::invalid(
        format!("policies.{}.bucket", policy.id),
        format!("'{}' is not a declared bucket", policy.bucket),
      ));
    };
    if bucket.public_access.blocks_public_policies()
      && document.grants_public_access()
    {
      return Err(ValidationError::invalid(
        field,
        format!(
          "grants public access but bucket '{}' has public_access '{}'",
          bucket.id,
          bucket.public_access.as_str()
        ),
      ));
    }
  }
  Ok(())
}
