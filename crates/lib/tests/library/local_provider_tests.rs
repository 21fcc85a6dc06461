use std::sync::Arc;

use stackflow_lib::execute::{CancelFlag, apply_plan, destroy_stack};
use stackflow_lib::model::ResourceKind;
use stackflow_lib::provider::{LocalProvider, ProviderConfig, ProviderError};
use stackflow_lib::execute::ApplyError;

use super::common::{Workspace, fast_config};

#[tokio::test]
async fn apply_and_destroy_against_filesystem() {
  let ws = Workspace::from_fixture("scenario.yaml");
  let stack = ws.load();
  let root = ws.temp.path().join("cloud");
  let provider = Arc::new(LocalProvider::new(&root, ProviderConfig::from_env(&stack.environment)));

  let outcome = apply_plan(&stack, None, provider.clone(), &fast_config(2), &CancelFlag::new())
    .await
    .unwrap();
  assert!(outcome.is_success());
  assert!(provider.record_path(ResourceKind::Bucket, "staging").exists());
  assert!(provider.record_path(ResourceKind::Pipeline, "pipeline").exists());
  assert!(provider.objects_dir("prod").is_dir());

  // A non-empty bucket cannot be deleted; destroy stops there.
  std::fs::write(provider.objects_dir("prod").join("index.html"), "<h1>prod</h1>").unwrap();
  let outcome = destroy_stack(&stack, provider.clone(), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();

  assert!(!outcome.is_success());
  let failed = &outcome.report.failed[0];
  assert_eq!(failed.entry.address.id, "prod");
  assert!(matches!(
    &failed.error,
    ApplyError::Provider { source: ProviderError::BucketNotEmpty(name), .. } if name == "prod"
  ));
  let remaining = stack.current_state().unwrap();
  assert!(remaining.get("pipeline").is_none());
  assert!(remaining.get("prod").is_some());
  assert!(remaining.get("staging").is_some());

  std::fs::remove_file(provider.objects_dir("prod").join("index.html")).unwrap();
  let outcome = destroy_stack(&stack, provider.clone(), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();
  assert!(outcome.is_success());
  assert!(stack.current_state().unwrap().is_empty());
  assert!(!provider.record_path(ResourceKind::Bucket, "prod").exists());
}
