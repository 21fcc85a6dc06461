//! Provider collaborators.
//!
//! The core never talks to cloud APIs itself; it calls a [`Provider`]. Two
//! providers ship with the crate: [`MemoryProvider`] for tests and
//! [`LocalProvider`], a filesystem emulator the CLI uses.

mod local;
mod memory;

pub use local::LocalProvider;
pub use memory::MemoryProvider;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Environment;
use crate::model::{Attributes, ResourceKind};

/// Domain suffix of generated website endpoints.
pub const DEFAULT_DOMAIN_SUFFIX: &str = "amazonaws.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  Create,
  Update,
  Delete,
  Describe,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Operation::Create => "create",
      Operation::Update => "update",
      Operation::Delete => "delete",
      Operation::Describe => "describe",
    })
  }
}

#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("{kind} '{id}' already exists")]
  AlreadyExists { kind: ResourceKind, id: String },

  #[error("{kind} '{id}' not found")]
  NotFound { kind: ResourceKind, id: String },

  #[error("invalid {kind} attributes: {message}")]
  InvalidAttributes { kind: ResourceKind, message: String },

  #[error("bucket '{0}' is not empty")]
  BucketNotEmpty(String),

  #[error("{operation} {kind} '{id}' rejected: {message}")]
  Rejected {
    operation: Operation,
    kind: ResourceKind,
    id: String,
    message: String,
  },

  #[error("provider I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("corrupt provider record {path}: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// A resource as the provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
  pub attributes: Attributes,
  /// Computed attributes (`id`, `name`, `arn`, `region`, `website_domain`, ...).
  pub outputs: BTreeMap<String, String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
  /// Create a resource and return its physical id.
  async fn create(&self, kind: ResourceKind, attributes: &Attributes) -> Result<String, ProviderError>;

  async fn update(&self, kind: ResourceKind, id: &str, attributes: &Attributes) -> Result<(), ProviderError>;

  async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError>;

  /// Current view of a resource; `None` when it does not exist (yet).
  async fn describe(&self, kind: ResourceKind, id: &str) -> Result<Option<RemoteResource>, ProviderError>;
}

/// Naming context shared by the bundled providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
  pub region: String,
  pub account: Option<String>,
  pub domain_suffix: String,
}

impl ProviderConfig {
  pub fn from_env(env: &Environment) -> Self {
    Self {
      region: env.region.clone(),
      account: env.account.clone(),
      domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_string(),
    }
  }

  fn string_attr<'a>(kind: ResourceKind, attributes: &'a Attributes, key: &str) -> Result<&'a str, ProviderError> {
    attributes
      .get(key)
      .and_then(Value::as_str)
      .filter(|s| !s.is_empty())
      .ok_or_else(|| ProviderError::InvalidAttributes {
        kind,
        message: format!("missing string attribute '{key}'"),
      })
  }

  /// Physical id the provider assigns: the bucket or pipeline name, or for a
  /// policy the name of the bucket it attaches to.
  pub fn physical_id(&self, kind: ResourceKind, attributes: &Attributes) -> Result<String, ProviderError> {
    let key = match kind {
      ResourceKind::Bucket | ResourceKind::Pipeline => "name",
      ResourceKind::BucketPolicy => "bucket",
    };
    Self::string_attr(kind, attributes, key).map(str::to_string)
  }

  /// Computed attributes of a converged resource.
  pub fn computed_outputs(&self, kind: ResourceKind, id: &str, attributes: &Attributes) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::from([("id".to_string(), id.to_string())]);
    match kind {
      ResourceKind::Bucket => {
        outputs.insert("name".to_string(), id.to_string());
        outputs.insert("arn".to_string(), format!("arn:aws:s3:::{id}"));
        outputs.insert("region".to_string(), self.region.clone());
        if attributes.get("website").is_some_and(|w| !w.is_null()) {
          outputs.insert(
            "website_domain".to_string(),
            format!("{id}.s3-website-{}.{}", self.region, self.domain_suffix),
          );
        }
      }
      ResourceKind::BucketPolicy => {
        outputs.insert("bucket".to_string(), id.to_string());
      }
      ResourceKind::Pipeline => {
        outputs.insert("name".to_string(), id.to_string());
        outputs.insert("region".to_string(), self.region.clone());
        outputs.insert(
          "arn".to_string(),
          format!(
            "arn:aws:codepipeline:{}:{}:{id}",
            self.region,
            self.account.as_deref().unwrap_or_default()
          ),
        );
      }
    }
    outputs
  }
}
