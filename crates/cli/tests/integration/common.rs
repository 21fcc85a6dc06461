//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory with isolated data and
/// provider paths.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  /// Create from a fixture file.
  ///
  /// Copies the fixture content to a temporary `stack.yaml` file.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("stack.yaml");
    std::fs::write(&config_path, fixture_content(name)).unwrap();
    Self { temp, config_path }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Replace text in the stack file, e.g. to edit it between runs.
  pub fn edit(&self, from: &str, to: &str) {
    let content = std::fs::read_to_string(&self.config_path).unwrap();
    assert!(content.contains(from), "stack file does not contain {from:?}");
    std::fs::write(&self.config_path, content.replace(from, to)).unwrap();
  }

  /// Data path for state snapshots.
  pub fn data_path(&self) -> PathBuf {
    let p = self.temp.path().join("data");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Root of the filesystem-backed provider.
  pub fn provider_path(&self) -> PathBuf {
    let p = self.temp.path().join("cloud");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Provider record of a resource, e.g. `record("bucket", "prod")`.
  pub fn record(&self, kind: &str, id: &str) -> PathBuf {
    self.provider_path().join(kind).join(format!("{id}.json"))
  }

  /// Get a pre-configured Command for the stackflow binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `STACKFLOW_HOME`: Isolated data path (state snapshots and locks)
  /// - `STACKFLOW_PROVIDER_ROOT`: Isolated provider root
  ///
  /// Convergence polls run every millisecond.
  pub fn stackflow_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("stackflow");
    cmd.env("STACKFLOW_HOME", self.data_path());
    cmd.env("STACKFLOW_PROVIDER_ROOT", self.provider_path());
    cmd.env_remove("STACKFLOW_REGION");
    cmd.env_remove("STACKFLOW_ACCOUNT");
    cmd.env_remove("RUST_LOG");
    cmd.arg("--poll-interval").arg("1ms");
    cmd
  }

  /// `stackflow <subcommand> <stack.yaml>`.
  pub fn run(&self, subcommand: &str) -> Command {
    let mut cmd = self.stackflow_cmd();
    cmd.arg(subcommand).arg(&self.config_path);
    cmd
  }
}
