use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use stackflow_lib::execute::{CancelFlag, apply_plan, plan_stack};
use stackflow_lib::model::{Attributes, ResourceKind};
use stackflow_lib::outputs::OutputError;
use stackflow_lib::plan::ChangeAction;
use stackflow_lib::provider::{MemoryProvider, Operation, Provider, ProviderConfig, ProviderError, RemoteResource};

use super::common::{Workspace, fast_config, memory_provider};

fn ids(entries: &[stackflow_lib::execute::ReportEntry]) -> Vec<&str> {
  entries.iter().map(|e| e.address.id.as_str()).collect()
}

#[tokio::test]
async fn failed_entry_and_everything_after_it_are_replanned() {
  let ws = Workspace::from_fixture("scenario.yaml");
  let stack = ws.load();
  let provider = memory_provider(&stack);
  provider.fail_on(ResourceKind::Bucket, Operation::Create, "prod");

  let outcome = apply_plan(&stack, None, provider.clone(), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();

  assert!(!outcome.is_success());
  assert_eq!(ids(&outcome.report.succeeded), vec!["staging"]);
  assert_eq!(outcome.report.failed[0].entry.address.id, "prod");
  assert_eq!(ids(&outcome.report.not_attempted), vec!["pipeline"]);
  assert!(matches!(
    &outcome.output_errors[..],
    [OutputError::Unresolved { output, .. }] if output == "ProdBucketWebsiteURL"
  ));

  let persisted = stack.current_state().unwrap();
  assert_eq!(persisted.resources.keys().collect::<Vec<_>>(), vec!["staging"]);

  let (plan, _) = plan_stack(&stack).unwrap();
  let actions: Vec<_> = plan.entries.iter().map(|e| (e.id(), e.action)).collect();
  assert_eq!(
    actions,
    vec![
      ("staging", ChangeAction::NoOp),
      ("prod", ChangeAction::Create),
      ("pipeline", ChangeAction::Create),
    ]
  );

  provider.clear_failures();
  let outcome = apply_plan(&stack, Some(plan), provider.clone(), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();
  assert!(outcome.is_success());
  assert_eq!(ids(&outcome.report.succeeded), vec!["prod", "pipeline"]);
  assert_eq!(ids(&outcome.report.unchanged), vec!["staging"]);
}

/// Requests cancellation once a number of creates went through.
struct CancelAfter {
  inner: MemoryProvider,
  cancel: CancelFlag,
  creates: AtomicUsize,
  limit: usize,
}

#[async_trait]
impl Provider for CancelAfter {
  async fn create(&self, kind: ResourceKind, attributes: &Attributes) -> Result<String, ProviderError> {
    let id = self.inner.create(kind, attributes).await?;
    if self.creates.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
      self.cancel.cancel();
    }
    Ok(id)
  }

  async fn update(&self, kind: ResourceKind, id: &str, attributes: &Attributes) -> Result<(), ProviderError> {
    self.inner.update(kind, id, attributes).await
  }

  async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
    self.inner.delete(kind, id).await
  }

  async fn describe(&self, kind: ResourceKind, id: &str) -> Result<Option<RemoteResource>, ProviderError> {
    self.inner.describe(kind, id).await
  }
}

#[tokio::test]
async fn cancellation_stops_between_entries() {
  let ws = Workspace::from_fixture("scenario.yaml");
  let stack = ws.load();
  let cancel = CancelFlag::new();
  let provider = Arc::new(CancelAfter {
    inner: MemoryProvider::new(ProviderConfig::from_env(&stack.environment)),
    cancel: cancel.clone(),
    creates: AtomicUsize::new(0),
    limit: 1,
  });

  let outcome = apply_plan(&stack, None, provider, &fast_config(1), &cancel)
    .await
    .unwrap();

  assert!(outcome.report.cancelled);
  assert_eq!(ids(&outcome.report.succeeded), vec!["staging"]);
  assert_eq!(ids(&outcome.report.not_attempted), vec!["prod", "pipeline"]);
  assert_eq!(stack.current_state().unwrap().resources.len(), 1);

  let (plan, _) = plan_stack(&stack).unwrap();
  assert_eq!(plan.summary().create, 2);
  assert_eq!(plan.summary().unchanged, 1);
}

#[tokio::test]
async fn edited_attribute_updates_in_place() {
  let ws = Workspace::from_fixture("scenario.yaml");
  let stack = ws.load();
  let provider = memory_provider(&stack);
  apply_plan(&stack, None, provider.clone(), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();

  ws.edit("versioned: true", "versioned: false");
  let stack = ws.load();
  let (plan, _) = plan_stack(&stack).unwrap();
  assert_eq!(plan.entry("staging").unwrap().action, ChangeAction::Update);
  assert_eq!(plan.entry("pipeline").unwrap().action, ChangeAction::NoOp);
  assert!(plan.entry("pipeline").unwrap().pending.is_empty());

  let outcome = apply_plan(&stack, Some(plan), provider.clone(), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();
  assert!(outcome.is_success());
  assert_eq!(ids(&outcome.report.succeeded), vec!["staging"]);
  assert!(ids(&outcome.report.unchanged).contains(&"pipeline"));
  assert_eq!(
    provider.operations().last().map(String::as_str),
    Some("update bucket staging")
  );
}
