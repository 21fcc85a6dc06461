//! Filesystem-backed provider.
//!
//! Each resource is a JSON record at `<root>/<kind>/<physical-id>.json`.
//! Buckets also get an object directory at `<root>/objects/<name>/`, which
//! must be empty before the bucket can be deleted. `describe` is immediately
//! consistent.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::model::{Attributes, ResourceKind};

use super::{Provider, ProviderConfig, ProviderError, RemoteResource};

pub struct LocalProvider {
  root: PathBuf,
  config: ProviderConfig,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ProviderError + '_ {
  move |source| ProviderError::Io {
    path: path.to_path_buf(),
    source,
  }
}

impl LocalProvider {
  pub fn new(root: impl Into<PathBuf>, config: ProviderConfig) -> Self {
    Self {
      root: root.into(),
      config,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn record_path(&self, kind: ResourceKind, id: &str) -> PathBuf {
    self.root.join(kind.as_str()).join(format!("{id}.json"))
  }

  /// Directory holding a bucket's objects.
  pub fn objects_dir(&self, bucket: &str) -> PathBuf {
    self.root.join("objects").join(bucket)
  }

  async fn read_record(&self, kind: ResourceKind, id: &str) -> Result<Option<RemoteResource>, ProviderError> {
    let path = self.record_path(kind, id);
    let content = match fs::read_to_string(&path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_error(&path)(e)),
    };
    serde_json::from_str(&content)
      .map(Some)
      .map_err(|source| ProviderError::Corrupt { path, source })
  }

  async fn write_record(&self, kind: ResourceKind, id: &str, attributes: &Attributes) -> Result<(), ProviderError> {
    let path = self.record_path(kind, id);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await.map_err(io_error(parent))?;
    }

    let record = RemoteResource {
      attributes: attributes.clone(),
      outputs: self.config.computed_outputs(kind, id, attributes),
    };
    let content = serde_json::to_string_pretty(&record).map_err(|source| ProviderError::Corrupt {
      path: path.clone(),
      source,
    })?;

    let mut temp_path = path.clone().into_os_string();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);
    fs::write(&temp_path, content).await.map_err(io_error(&temp_path))?;
    fs::rename(&temp_path, &path).await.map_err(io_error(&path))?;
    Ok(())
  }

  async fn require(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
    match self.read_record(kind, id).await? {
      Some(_) => Ok(()),
      None => Err(ProviderError::NotFound {
        kind,
        id: id.to_string(),
      }),
    }
  }
}

#[async_trait]
impl Provider for LocalProvider {
  async fn create(&self, kind: ResourceKind, attributes: &Attributes) -> Result<String, ProviderError> {
    let id = self.config.physical_id(kind, attributes)?;
    if self.read_record(kind, &id).await?.is_some() {
      return Err(ProviderError::AlreadyExists { kind, id });
    }
    if kind == ResourceKind::BucketPolicy {
      self.require(ResourceKind::Bucket, &id).await?;
    }

    if kind == ResourceKind::Bucket {
      let dir = self.objects_dir(&id);
      fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;
    }
    self.write_record(kind, &id, attributes).await?;
    debug!(%kind, id, root = %self.root.display(), "local provider create");
    Ok(id)
  }

  async fn update(&self, kind: ResourceKind, id: &str, attributes: &Attributes) -> Result<(), ProviderError> {
    self.require(kind, id).await?;
    self.write_record(kind, id, attributes).await
  }

  async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
    self.require(kind, id).await?;

    if kind == ResourceKind::Bucket {
      let dir = self.objects_dir(id);
      match std::fs::read_dir(&dir) {
        Ok(mut entries) => {
          if entries.next().is_some() {
            return Err(ProviderError::BucketNotEmpty(id.to_string()));
          }
          fs::remove_dir(&dir).await.map_err(io_error(&dir))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_error(&dir)(e)),
      }
    }

    let path = self.record_path(kind, id);
    fs::remove_file(&path).await.map_err(io_error(&path))?;
    debug!(%kind, id, "local provider delete");
    Ok(())
  }

  async fn describe(&self, kind: ResourceKind, id: &str) -> Result<Option<RemoteResource>, ProviderError> {
    self.read_record(kind, id).await
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use tempfile::TempDir;

  use super::*;
  use crate::config::Environment;

  fn provider() -> (TempDir, LocalProvider) {
    let temp = TempDir::new().unwrap();
    let provider = LocalProvider::new(
      temp.path(),
      ProviderConfig::from_env(&Environment::new("us-east-1")),
    );
    (temp, provider)
  }

  fn bucket(name: &str) -> Attributes {
    Attributes::from([
      ("name".to_string(), json!(name)),
      ("website".to_string(), json!({"index_document": "index.html"})),
    ])
  }

  #[tokio::test]
  async fn create_writes_record_and_objects_dir() {
    let (_temp, provider) = provider();
    provider.create(ResourceKind::Bucket, &bucket("site")).await.unwrap();

    assert!(provider.record_path(ResourceKind::Bucket, "site").exists());
    assert!(provider.objects_dir("site").is_dir());

    let remote = provider.describe(ResourceKind::Bucket, "site").await.unwrap().unwrap();
    assert_eq!(remote.outputs["website_domain"], "site.s3-website-us-east-1.amazonaws.com");
  }

  #[tokio::test]
  async fn duplicate_create_fails() {
    let (_temp, provider) = provider();
    provider.create(ResourceKind::Bucket, &bucket("site")).await.unwrap();
    let err = provider.create(ResourceKind::Bucket, &bucket("site")).await.unwrap_err();
    assert!(matches!(err, ProviderError::AlreadyExists { .. }));
  }

  #[tokio::test]
  async fn update_rewrites_attributes() {
    let (_temp, provider) = provider();
    provider.create(ResourceKind::Bucket, &bucket("site")).await.unwrap();

    let mut changed = bucket("site");
    changed.insert("versioned".to_string(), json!(true));
    provider.update(ResourceKind::Bucket, "site", &changed).await.unwrap();

    let remote = provider.describe(ResourceKind::Bucket, "site").await.unwrap().unwrap();
    assert_eq!(remote.attributes["versioned"], json!(true));
  }

  #[tokio::test]
  async fn delete_refuses_non_empty_bucket() {
    let (_temp, provider) = provider();
    provider.create(ResourceKind::Bucket, &bucket("site")).await.unwrap();
    std::fs::write(provider.objects_dir("site").join("index.html"), "<h1>hi</h1>").unwrap();

    let err = provider.delete(ResourceKind::Bucket, "site").await.unwrap_err();
    assert!(matches!(err, ProviderError::BucketNotEmpty(name) if name == "site"));

    std::fs::remove_file(provider.objects_dir("site").join("index.html")).unwrap();
    provider.delete(ResourceKind::Bucket, "site").await.unwrap();
    assert!(provider.describe(ResourceKind::Bucket, "site").await.unwrap().is_none());
    assert!(!provider.objects_dir("site").exists());
  }

  #[tokio::test]
  async fn corrupt_record_reported() {
    let (_temp, provider) = provider();
    let path = provider.record_path(ResourceKind::Pipeline, "promote");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{not json").unwrap();

    let err = provider.describe(ResourceKind::Pipeline, "promote").await.unwrap_err();
    assert!(matches!(err, ProviderError::Corrupt { .. }));
  }
}
