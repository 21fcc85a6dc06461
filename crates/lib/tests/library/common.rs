//! Shared helpers for library integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stackflow_lib::config::EnvironmentOverrides;
use stackflow_lib::execute::{ExecuteConfig, LoadedStack, StackOptions, load_stack};
use stackflow_lib::provider::{MemoryProvider, ProviderConfig};
use tempfile::TempDir;

pub fn fixtures_dir() -> PathBuf {
  Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/library/fixtures")
}

/// A temp workspace holding a copy of a fixture and a data directory.
pub struct Workspace {
  pub temp: TempDir,
  pub stack_file: PathBuf,
}

impl Workspace {
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let stack_file = temp.path().join(name);
    std::fs::copy(fixtures_dir().join(name), &stack_file).unwrap();
    for extra in ["public-read.json"] {
      let source = fixtures_dir().join(extra);
      if source.exists() {
        std::fs::copy(source, temp.path().join(extra)).unwrap();
      }
    }
    Self { temp, stack_file }
  }

  pub fn data_dir(&self) -> PathBuf {
    self.temp.path().join("data")
  }

  pub fn load(&self) -> LoadedStack {
    let options = StackOptions {
      data_dir: self.data_dir(),
      overrides: EnvironmentOverrides {
        region: Some("eu-west-1".to_string()),
        account: Some("123456789012".to_string()),
      },
    };
    load_stack(&self.stack_file, &options).unwrap()
  }

  /// Rewrite the stack file, e.g. to simulate an edit between runs.
  pub fn edit(&self, from: &str, to: &str) {
    let content = std::fs::read_to_string(&self.stack_file).unwrap();
    assert!(content.contains(from), "fixture does not contain {from:?}");
    std::fs::write(&self.stack_file, content.replace(from, to)).unwrap();
  }
}

pub fn memory_provider(stack: &LoadedStack) -> Arc<MemoryProvider> {
  Arc::new(MemoryProvider::new(ProviderConfig::from_env(&stack.environment)))
}

pub fn fast_config(parallelism: usize) -> ExecuteConfig {
  ExecuteConfig {
    parallelism,
    poll_interval: Duration::from_millis(1),
    max_polls: 10,
  }
}
