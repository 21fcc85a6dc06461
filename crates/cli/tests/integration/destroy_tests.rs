//! Destroy command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn destroy_dry_run_changes_nothing() {
  let env = TestEnv::from_fixture("site.yaml");
  env.run("apply").assert().success();

  env
    .run("destroy")
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("- pipeline.pipeline"))
    .stdout(predicate::str::contains("Would remove 3 resource(s)"));

  assert!(env.record("bucket", "prod").exists());
}

#[test]
fn destroy_requires_confirmation_when_not_interactive() {
  let env = TestEnv::from_fixture("site.yaml");
  env.run("apply").assert().success();

  env
    .run("destroy")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));

  assert!(env.record("bucket", "prod").exists());
}

#[test]
fn destroy_removes_everything() {
  let env = TestEnv::from_fixture("site.yaml");
  env.run("apply").assert().success();

  env
    .run("destroy")
    .arg("--force")
    .assert()
    .success()
    .stdout(predicate::str::contains("Destroy complete! 3 resource(s) removed, 0 retained"));

  assert!(!env.record("bucket", "staging").exists());
  assert!(!env.record("bucket", "prod").exists());
  assert!(!env.record("pipeline", "pipeline").exists());

  env
    .run("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("No state recorded"));
}

#[test]
fn destroy_stops_at_non_empty_bucket() {
  let env = TestEnv::from_fixture("site.yaml");
  env.run("apply").assert().success();
  env.write_file("cloud/objects/prod/index.html", "<h1>prod</h1>");

  env
    .run("destroy")
    .arg("--force")
    .assert()
    .failure()
    .stderr(predicate::str::contains("not empty"))
    .stderr(predicate::str::contains("Destroy incomplete"));

  assert!(!env.record("pipeline", "pipeline").exists());
  assert!(env.record("bucket", "prod").exists());
  env
    .run("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("bucket.prod"))
    .stdout(predicate::str::contains("pipeline.pipeline").not());
}

#[test]
fn destroy_forgets_retained_bucket() {
  let env = TestEnv::from_fixture("retain.yaml");
  env.run("apply").assert().success();

  env
    .run("destroy")
    .arg("--force")
    .assert()
    .success()
    .stderr(predicate::str::contains("retained"))
    .stdout(predicate::str::contains("0 resource(s) removed, 1 retained"));

  assert!(env.record("bucket", "access-logs").exists());
  env
    .run("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("No state recorded"));
}

#[test]
fn removing_a_bucket_from_the_file_deletes_it() {
  let env = TestEnv::from_fixture("retain.yaml");
  env.edit("    versioned: true\n", "    versioned: true\n    removal_policy: destroy\n");
  env.run("apply").assert().success();

  env.edit("  - id: access-logs\n    versioned: true\n    removal_policy: destroy\n", "  []\n");
  env
    .run("apply")
    .assert()
    .success()
    .stdout(predicate::str::contains("delete bucket.access-logs"));

  assert!(!env.record("bucket", "access-logs").exists());
}
