use std::collections::BTreeMap;

use stackflow_lib::execute::resolver::StateResolver;
use stackflow_lib::execute::{CancelFlag, StackError, apply_plan, plan_stack};
use stackflow_lib::graph::GraphError;
use stackflow_lib::plan::{ChangeAction, PlanError};
use stackflow_lib::policy::{self, PolicyDocument, PolicyError};
use stackflow_lib::state::StateFile;

use super::common::{Workspace, fast_config, memory_provider};

#[tokio::test]
async fn website_scenario_creates_three_resources_and_exports_url() {
  let ws = Workspace::from_fixture("scenario.yaml");
  let stack = ws.load();

  let (plan, _) = plan_stack(&stack).unwrap();
  let entries: Vec<_> = plan.entries.iter().map(|e| (e.id(), e.action)).collect();
  assert_eq!(
    entries,
    vec![
      ("staging", ChangeAction::Create),
      ("prod", ChangeAction::Create),
      ("pipeline", ChangeAction::Create),
    ]
  );

  let outcome = apply_plan(&stack, Some(plan), memory_provider(&stack), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();

  assert!(outcome.is_success());
  assert_eq!(
    outcome.outputs,
    BTreeMap::from([(
      "ProdBucketWebsiteURL".to_string(),
      "http://prod.s3-website-eu-west-1.amazonaws.com/".to_string()
    )])
  );
}

#[test]
fn planning_twice_gives_identical_change_sets() {
  let ws = Workspace::from_fixture("site.yaml");
  let stack = ws.load();

  let (first, _) = plan_stack(&stack).unwrap();
  let (second, _) = plan_stack(&stack).unwrap();

  assert_eq!(first, second);
  assert_eq!(first.id().unwrap(), second.id().unwrap());
}

#[tokio::test]
async fn apply_then_replan_is_all_noops() {
  let ws = Workspace::from_fixture("site.yaml");
  let stack = ws.load();
  let provider = memory_provider(&stack);

  let outcome = apply_plan(&stack, None, provider.clone(), &fast_config(4), &CancelFlag::new())
    .await
    .unwrap();
  assert!(outcome.is_success(), "{:?}", outcome.report);
  assert_eq!(outcome.report.succeeded.len(), 4);
  assert_eq!(outcome.outputs["StagingBucketArn"], "arn:aws:s3:::staging");

  let (plan, _) = plan_stack(&stack).unwrap();
  assert!(!plan.has_changes(), "{}", plan.summary());
  assert_eq!(plan.summary().unchanged, 4);
}

#[tokio::test]
async fn env_placeholders_resolve_into_tags() {
  let ws = Workspace::from_fixture("site.yaml");
  let stack = ws.load();

  let outcome = apply_plan(&stack, None, memory_provider(&stack), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();

  let prod = outcome.state.get("prod").unwrap();
  assert_eq!(prod.attributes["tags"]["Region"], "eu-west-1");
  assert_eq!(prod.attributes["tags"]["Environment"], "production");
}

#[test]
fn reference_cycle_fails_before_planning() {
  let ws = Workspace::from_fixture("cycle.yaml");
  let stack = ws.load();

  let err = plan_stack(&stack).unwrap_err();
  match err {
    StackError::Plan(PlanError::Graph(GraphError::Cycle { path })) => {
      assert!(path.iter().any(|p| p.contains("first")));
      assert!(path.iter().any(|p| p.contains("second")));
    }
    other => panic!("expected cycle, got {other}"),
  }
}

#[tokio::test]
async fn policy_binds_only_after_bucket_is_applied() {
  let ws = Workspace::from_fixture("site.yaml");
  let stack = ws.load();
  let policy = stack.model.get("prod-public-read").unwrap();
  let document = PolicyDocument::from_value(policy.attributes["document"].clone()).unwrap();

  let empty = StateFile::new("site");
  let err = policy::resolve(&document, &StateResolver::new(&empty, &stack.environment)).unwrap_err();
  assert!(matches!(err, PolicyError::UnresolvedReference { ref symbol, .. } if symbol == "prod.arn"));

  let outcome = apply_plan(&stack, None, memory_provider(&stack), &fast_config(1), &CancelFlag::new())
    .await
    .unwrap();
  let resolved = policy::resolve(&document, &StateResolver::new(&outcome.state, &stack.environment)).unwrap();
  let value = resolved.to_value();
  assert_eq!(value["Statement"][0]["Resource"], "arn:aws:s3:::prod/*");
  assert_eq!(outcome.state.get("prod-public-read").unwrap().attributes["bucket"], "prod");
}
