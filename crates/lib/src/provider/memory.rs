//! In-process provider.
//!
//! Keeps resources in a map, enforces global name uniqueness per kind and can
//! emulate eventual consistency (describe lags behind mutations for a number
//! of polls) and inject failures for chosen operations.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::model::{Attributes, ResourceKind};

use super::{Operation, Provider, ProviderConfig, ProviderError, RemoteResource};

#[derive(Debug, Default)]
struct Slot {
  actual: Option<RemoteResource>,
  visible: Option<RemoteResource>,
  lag_left: u32,
}

#[derive(Debug, Default)]
struct Inner {
  resources: BTreeMap<(ResourceKind, String), Slot>,
  reserved: HashSet<(ResourceKind, String)>,
  failures: HashSet<(ResourceKind, Operation, String)>,
  lag: u32,
  log: Vec<String>,
}

pub struct MemoryProvider {
  config: ProviderConfig,
  inner: Mutex<Inner>,
}

impl MemoryProvider {
  pub fn new(config: ProviderConfig) -> Self {
    Self {
      config,
      inner: Mutex::new(Inner::default()),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Make `describe` report the previous view for `polls` calls after each mutation.
  pub fn with_describe_lag(self, polls: u32) -> Self {
    self.lock().lag = polls;
    self
  }

  /// Fail every `operation` on the resource with physical id `id`.
  pub fn fail_on(&self, kind: ResourceKind, operation: Operation, id: &str) {
    self.lock().failures.insert((kind, operation, id.to_string()));
  }

  pub fn clear_failures(&self) {
    self.lock().failures.clear();
  }

  /// Pretend a name is owned by someone else.
  pub fn reserve(&self, kind: ResourceKind, id: &str) {
    self.lock().reserved.insert((kind, id.to_string()));
  }

  /// Every mutating call so far, e.g. `create bucket prod`.
  pub fn operations(&self) -> Vec<String> {
    self.lock().log.clone()
  }

  /// The resource as it actually exists, ignoring describe lag.
  pub fn get(&self, kind: ResourceKind, id: &str) -> Option<RemoteResource> {
    self
      .lock()
      .resources
      .get(&(kind, id.to_string()))
      .and_then(|slot| slot.actual.clone())
  }

  pub fn exists(&self, kind: ResourceKind, id: &str) -> bool {
    self.get(kind, id).is_some()
  }

  fn check_failure(inner: &Inner, kind: ResourceKind, operation: Operation, id: &str) -> Result<(), ProviderError> {
    if inner.failures.contains(&(kind, operation, id.to_string())) {
      return Err(ProviderError::Rejected {
        operation,
        kind,
        id: id.to_string(),
        message: "injected failure".to_string(),
      });
    }
    Ok(())
  }

  fn mutate(inner: &mut Inner, kind: ResourceKind, id: &str, actual: Option<RemoteResource>) {
    let lag = inner.lag;
    let slot = inner.resources.entry((kind, id.to_string())).or_default();
    slot.actual = actual;
    if lag == 0 {
      slot.visible = slot.actual.clone();
    }
    slot.lag_left = lag;
  }
}

#[async_trait]
impl Provider for MemoryProvider {
  async fn create(&self, kind: ResourceKind, attributes: &Attributes) -> Result<String, ProviderError> {
    let id = self.config.physical_id(kind, attributes)?;
    let mut inner = self.lock();
    Self::check_failure(&inner, kind, Operation::Create, &id)?;

    let taken = inner.reserved.contains(&(kind, id.clone()))
      || inner
        .resources
        .get(&(kind, id.clone()))
        .is_some_and(|slot| slot.actual.is_some());
    if taken {
      return Err(ProviderError::AlreadyExists { kind, id });
    }

    if kind == ResourceKind::BucketPolicy
      && !inner
        .resources
        .get(&(ResourceKind::Bucket, id.clone()))
        .is_some_and(|slot| slot.actual.is_some())
    {
      return Err(ProviderError::NotFound {
        kind: ResourceKind::Bucket,
        id,
      });
    }

    let remote = RemoteResource {
      attributes: attributes.clone(),
      outputs: self.config.computed_outputs(kind, &id, attributes),
    };
    Self::mutate(&mut inner, kind, &id, Some(remote));
    inner.log.push(format!("create {kind} {id}"));
    debug!(%kind, id, "memory provider create");
    Ok(id)
  }

  async fn update(&self, kind: ResourceKind, id: &str, attributes: &Attributes) -> Result<(), ProviderError> {
    let mut inner = self.lock();
    Self::check_failure(&inner, kind, Operation::Update, id)?;

    let exists = inner
      .resources
      .get(&(kind, id.to_string()))
      .is_some_and(|slot| slot.actual.is_some());
    if !exists {
      return Err(ProviderError::NotFound {
        kind,
        id: id.to_string(),
      });
    }

    let remote = RemoteResource {
      attributes: attributes.clone(),
      outputs: self.config.computed_outputs(kind, id, attributes),
    };
    Self::mutate(&mut inner, kind, id, Some(remote));
    inner.log.push(format!("update {kind} {id}"));
    Ok(())
  }

  async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
    let mut inner = self.lock();
    Self::check_failure(&inner, kind, Operation::Delete, id)?;

    let exists = inner
      .resources
      .get(&(kind, id.to_string()))
      .is_some_and(|slot| slot.actual.is_some());
    if !exists {
      return Err(ProviderError::NotFound {
        kind,
        id: id.to_string(),
      });
    }

    Self::mutate(&mut inner, kind, id, None);
    inner.log.push(format!("delete {kind} {id}"));
    Ok(())
  }

  async fn describe(&self, kind: ResourceKind, id: &str) -> Result<Option<RemoteResource>, ProviderError> {
    let mut inner = self.lock();
    Self::check_failure(&inner, kind, Operation::Describe, id)?;

    let Some(slot) = inner.resources.get_mut(&(kind, id.to_string())) else {
      return Ok(None);
    };
    if slot.lag_left > 0 {
      slot.lag_left -= 1;
      return Ok(slot.visible.clone());
    }
    slot.visible = slot.actual.clone();
    Ok(slot.actual.clone())
  }
}
