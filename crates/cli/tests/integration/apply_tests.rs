//! Apply command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn apply_site_exports_website_url() {
  let env = TestEnv::from_fixture("site.yaml");

  env
    .run("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("Apply complete"))
    .stdout(predicate::str::contains("http://prod.s3-website-eu-west-1.amazonaws.com/"));

  assert!(env.record("bucket", "staging").exists());
  assert!(env.record("bucket", "prod").exists());
  assert!(env.record("pipeline", "pipeline").exists());
}

#[test]
fn apply_is_idempotent() {
  let env = TestEnv::from_fixture("site.yaml");

  env.run("apply").assert().success();

  env
    .run("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes"));

  env
    .run("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes"));
}

#[test]
fn apply_saved_plan() {
  let env = TestEnv::from_fixture("site.yaml");
  let plan_path = env.temp.path().join("site.plan.json");

  env
    .run("plan")
    .arg("--out")
    .arg(&plan_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Plan saved"));

  env
    .run("apply")
    .arg("--plan")
    .arg(&plan_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Apply complete"));
}

#[test]
fn stale_saved_plan_rejected() {
  let env = TestEnv::from_fixture("site.yaml");
  let plan_path = env.temp.path().join("site.plan.json");

  env.run("plan").arg("--out").arg(&plan_path).assert().success();
  env.run("apply").assert().success();

  env
    .run("apply")
    .arg("--plan")
    .arg(&plan_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("stale"));
}

#[test]
fn tampered_saved_plan_rejected() {
  let env = TestEnv::from_fixture("site.yaml");
  let plan_path = env.temp.path().join("site.plan.json");

  env.run("plan").arg("--out").arg(&plan_path).assert().success();
  let content = std::fs::read_to_string(&plan_path).unwrap();
  std::fs::write(&plan_path, content.replace("eu-west-1", "us-east-1")).unwrap();

  env
    .run("apply")
    .arg("--plan")
    .arg(&plan_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("does not match"));
}

#[test]
fn partial_apply_reports_and_fails() {
  let env = TestEnv::from_fixture("site.yaml");
  // Someone else already owns the name "prod".
  env.write_file("cloud/bucket/prod.json", r#"{ "attributes": {}, "outputs": {} }"#);

  env
    .run("apply")
    .arg("--parallelism")
    .arg("1")
    .assert()
    .failure()
    .stdout(predicate::str::contains("create bucket.staging"))
    .stdout(predicate::str::contains("not attempted: create pipeline.pipeline"))
    .stderr(predicate::str::contains("already exists"))
    .stderr(predicate::str::contains("Apply incomplete: 1 succeeded, 1 failed, 1 not attempted"));

  env
    .run("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("bucket.staging"))
    .stdout(predicate::str::contains("bucket.prod").not());
}

#[test]
fn rerun_after_partial_apply_completes() {
  let env = TestEnv::from_fixture("site.yaml");
  env.write_file("cloud/bucket/prod.json", r#"{ "attributes": {}, "outputs": {} }"#);
  env.run("apply").arg("--parallelism").arg("1").assert().failure();

  std::fs::remove_file(env.record("bucket", "prod")).unwrap();

  env
    .run("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("2 to create"))
    .stdout(predicate::str::contains("1 unchanged"));

  env
    .run("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("Apply complete"));
}

#[test]
fn renamed_bucket_is_replaced() {
  let env = TestEnv::from_fixture("site.yaml");
  env.run("apply").assert().success();

  env.edit(
    "  - id: prod\n    public_access: block-acls\n",
    "  - id: prod\n    name: prod-v2\n    public_access: block-acls\n",
  );

  env
    .run("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("-/+ bucket.prod"));

  env.run("apply").assert().success();

  assert!(!env.record("bucket", "prod").exists());
  assert!(env.record("bucket", "prod-v2").exists());
  env
    .run("outputs")
    .assert()
    .success()
    .stdout(predicate::str::contains("prod-v2.s3-website-eu-west-1.amazonaws.com"));
}

#[test]
fn outputs_after_apply() {
  let env = TestEnv::from_fixture("site.yaml");
  env.run("apply").assert().success();

  let output = env.run("outputs").arg("--json").output().unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["ProdBucketWebsiteURL"], "http://prod.s3-website-eu-west-1.amazonaws.com/");
}

#[test]
fn status_after_apply() {
  let env = TestEnv::from_fixture("site.yaml");
  env.run("apply").assert().success();

  env
    .run("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("Resources: 3"))
    .stdout(predicate::str::contains("pipeline.pipeline"));
}

#[test]
fn graph_shows_waves_and_dependencies() {
  let env = TestEnv::from_fixture("site.yaml");

  env
    .run("graph")
    .assert()
    .success()
    .stdout(predicate::str::contains("0: bucket.staging, bucket.prod"))
    .stdout(predicate::str::contains("1: pipeline.pipeline"))
    .stdout(predicate::str::contains("pipeline.pipeline → bucket.prod"));
}

#[test]
fn cycle_rejected_before_any_provider_call() {
  let env = TestEnv::from_fixture("cycle.yaml");

  env
    .run("validate")
    .assert()
    .failure()
    .stderr(predicate::str::contains("cycle"));

  env
    .run("apply")
    .assert()
    .failure()
    .stderr(predicate::str::contains("cycle"));

  assert!(!env.provider_path().join("bucket").exists());
}

#[test]
fn validate_accepts_site() {
  let env = TestEnv::from_fixture("site.yaml");

  env
    .run("validate")
    .assert()
    .success()
    .stdout(predicate::str::contains("is valid: 3 resource(s), 1 output(s)"));
}
