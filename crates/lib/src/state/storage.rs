//! State storage for one stack.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/stacks/<stack>/
//! ├── .lock               # advisory lock, see `state::lock`
//! ├── index.json          # StateIndex: snapshot list + current pointer
//! └── <id>.json           # StateFile snapshots, one per apply run
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::consts::STATE_FORMAT_VERSION;

use super::types::{
  STATE_INDEX_VERSION, SnapshotMetadata, StateError, StateFile, StateIndex, generate_snapshot_id, now_millis,
};

/// Index file name.
const INDEX_FILENAME: &str = "index.json";

/// Manages the state snapshots of a single stack.
///
/// All writes go to a temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct StateStore {
  base_path: PathBuf,
}

impl StateStore {
  pub fn new(base_path: PathBuf) -> Self {
    Self { base_path }
  }

  /// Store for `stack` under a data directory.
  pub fn for_stack(data_dir: &Path, stack: &str) -> Self {
    Self::new(data_dir.join("stacks").join(stack))
  }

  pub fn base_path(&self) -> &Path {
    &self.base_path
  }

  fn index_path(&self) -> PathBuf {
    self.base_path.join(INDEX_FILENAME)
  }

  fn snapshot_path(&self, id: &str) -> PathBuf {
    self.base_path.join(format!("{}.json", id))
  }

  fn ensure_dir(&self) -> Result<(), StateError> {
    fs::create_dir_all(&self.base_path).map_err(StateError::CreateDir)
  }

  fn write_atomic(&self, path: &Path, content: &str) -> Result<(), StateError> {
    self.ensure_dir()?;
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    fs::write(&temp_path, content).map_err(StateError::Write)?;
    fs::rename(&temp_path, path).map_err(StateError::Write)?;
    Ok(())
  }

  /// Load the index. Returns an empty index if the file doesn't exist.
  pub fn load_index(&self) -> Result<StateIndex, StateError> {
    let content = match fs::read_to_string(self.index_path()) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateIndex::new()),
      Err(e) => return Err(StateError::Read(e)),
    };

    let index: StateIndex = serde_json::from_str(&content).map_err(StateError::Parse)?;

    if index.version != STATE_INDEX_VERSION {
      return Err(StateError::UnsupportedVersion(index.version));
    }

    Ok(index)
  }

  fn save_index(&self, index: &StateIndex) -> Result<(), StateError> {
    let content = serde_json::to_string_pretty(index).map_err(StateError::Serialize)?;
    self.write_atomic(&self.index_path(), &content)
  }

  pub fn current_id(&self) -> Result<Option<String>, StateError> {
    Ok(self.load_index()?.current)
  }

  /// Load the current state. Returns `Ok(None)` if nothing has been applied yet.
  pub fn load_current(&self) -> Result<Option<StateFile>, StateError> {
    match self.load_index()?.current {
      Some(id) => Ok(Some(self.load_snapshot(&id)?)),
      None => Ok(None),
    }
  }

  /// Load the current state of `stack`, or an empty one.
  pub fn load_or_empty(&self, stack: &str) -> Result<StateFile, StateError> {
    match self.load_current()? {
      Some(state) if state.stack != stack => Err(StateError::StackMismatch {
        expected: stack.to_string(),
        found: state.stack,
      }),
      Some(state) => Ok(state),
      None => Ok(StateFile::new(stack)),
    }
  }

  pub fn load_snapshot(&self, id: &str) -> Result<StateFile, StateError> {
    let content = fs::read_to_string(self.snapshot_path(id)).map_err(|e| {
      if e.kind() == io::ErrorKind::NotFound {
        StateError::NotFound(id.to_string())
      } else {
        StateError::Read(e)
      }
    })?;

    let state: StateFile = serde_json::from_str(&content).map_err(StateError::Parse)?;
    if state.version != STATE_FORMAT_VERSION {
      return Err(StateError::UnsupportedVersion(state.version));
    }
    Ok(state)
  }

  /// Write `state` as snapshot `id` and make it current.
  ///
  /// Saving the same id again overwrites it, which is how checkpoints during
  /// one apply run update a single snapshot.
  pub fn checkpoint(&self, id: &str, state: &StateFile) -> Result<(), StateError> {
    let content = serde_json::to_string_pretty(state).map_err(StateError::Serialize)?;
    self.write_atomic(&self.snapshot_path(id), &content)?;

    let mut index = self.load_index()?;
    let created_at = index
      .snapshots
      .iter()
      .find(|s| s.id == id)
      .map(|s| s.created_at)
      .unwrap_or_else(now_millis);
    index.upsert(SnapshotMetadata {
      id: id.to_string(),
      created_at,
      serial: state.serial,
      resource_count: state.resources.len(),
    });
    index.current = Some(id.to_string());
    self.save_index(&index)?;

    debug!(snapshot = id, serial = state.serial, "state checkpoint");
    Ok(())
  }

  /// Clear the current pointer without removing any snapshots.
  pub fn clear_current(&self) -> Result<(), StateError> {
    let mut index = self.load_index()?;
    index.current = None;
    self.save_index(&index)
  }

  /// All snapshots, oldest first.
  pub fn list(&self) -> Result<Vec<SnapshotMetadata>, StateError> {
    Ok(self.load_index()?.snapshots)
  }

  /// Remove a snapshot file and its index entry.
  pub fn delete_snapshot(&self, id: &str) -> Result<(), StateError> {
    match fs::remove_file(self.snapshot_path(id)) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(StateError::Write(e)),
    }

    let mut index = self.load_index()?;
    index.remove(id);
    self.save_index(&index)
  }

  pub fn generate_id() -> String {
    generate_snapshot_id()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Attributes, ResourceKind};
  use crate::state::ResourceState;
  use tempfile::TempDir;

  fn temp_store() -> (TempDir, StateStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = StateStore::new(temp_dir.path().to_path_buf());
    (temp_dir, store)
  }

  fn state_with(ids: &[&str]) -> StateFile {
    let mut state = StateFile::new("site");
    for id in ids {
      state.record(
        *id,
        ResourceState {
          kind: ResourceKind::Bucket,
          physical_id: id.to_string(),
          attributes: Attributes::new(),
          outputs: Default::default(),
          depends_on: Vec::new(),
        },
      );
    }
    state
  }

  #[test]
  fn load_index_empty_when_not_exists() {
    let (_temp, store) = temp_store();
    let index = store.load_index().unwrap();
    assert!(index.is_empty());
    assert!(index.current.is_none());
  }

  #[test]
  fn load_current_when_none() {
    let (_temp, store) = temp_store();
    assert!(store.load_current().unwrap().is_none());
    assert_eq!(store.load_or_empty("site").unwrap(), StateFile::new("site"));
  }

  #[test]
  fn checkpoint_sets_current() {
    let (_temp, store) = temp_store();
    let state = state_with(&["prod"]);

    store.checkpoint("run1", &state).unwrap();

    assert_eq!(store.current_id().unwrap(), Some("run1".to_string()));
    assert_eq!(store.load_current().unwrap(), Some(state));
  }

  #[test]
  fn checkpoints_overwrite_one_snapshot_per_run() {
    let (_temp, store) = temp_store();

    store.checkpoint("run1", &state_with(&["a"])).unwrap();
    let created_at = store.list().unwrap()[0].created_at;
    store.checkpoint("run1", &state_with(&["a", "b"])).unwrap();

    let list = store.list().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].resource_count, 2);
    assert_eq!(list[0].serial, 2);
    assert_eq!(list[0].created_at, created_at);
  }

  #[test]
  fn new_run_keeps_previous_snapshot() {
    let (_temp, store) = temp_store();
    store.checkpoint("run1", &state_with(&["a"])).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    store.checkpoint("run2", &state_with(&["a", "b"])).unwrap();

    let list = store.list().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, "run1");
    assert_eq!(store.current_id().unwrap().as_deref(), Some("run2"));
    assert_eq!(store.load_snapshot("run1").unwrap().resources.len(), 1);
  }

  #[test]
  fn load_snapshot_not_found() {
    let (_temp, store) = temp_store();
    let result = store.load_snapshot("nonexistent");
    assert!(matches!(result, Err(StateError::NotFound(_))));
  }

  #[test]
  fn stack_mismatch_detected() {
    let (_temp, store) = temp_store();
    store.checkpoint("run1", &state_with(&["a"])).unwrap();
    let result = store.load_or_empty("other");
    assert!(matches!(result, Err(StateError::StackMismatch { .. })));
  }

  #[test]
  fn clear_current_removes_pointer() {
    let (_temp, store) = temp_store();
    store.checkpoint("run1", &state_with(&["a"])).unwrap();

    store.clear_current().unwrap();

    assert!(store.current_id().unwrap().is_none());
    assert!(store.load_current().unwrap().is_none());
    assert!(store.load_snapshot("run1").is_ok());
    assert_eq!(store.list().unwrap().len(), 1);
  }

  #[test]
  fn delete_snapshot_clears_current() {
    let (_temp, store) = temp_store();
    store.checkpoint("run1", &state_with(&["a"])).unwrap();
    store.delete_snapshot("run1").unwrap();

    let index = store.load_index().unwrap();
    assert!(index.is_empty());
    assert!(index.current.is_none());
    assert!(store.load_snapshot("run1").is_err());
  }

  #[test]
  fn delete_nonexistent_succeeds() {
    let (_temp, store) = temp_store();
    store.delete_snapshot("nonexistent").unwrap();
  }

  #[test]
  fn generate_id_is_unique() {
    let id1 = StateStore::generate_id();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let id2 = StateStore::generate_id();
    assert_ne!(id1, id2);
  }

  #[test]
  fn load_index_handles_corrupted_json() {
    let (temp, store) = temp_store();
    fs::write(temp.path().join(INDEX_FILENAME), "not valid json {{{").unwrap();
    assert!(matches!(store.load_index(), Err(StateError::Parse(_))));
  }

  #[test]
  fn load_index_handles_empty_file() {
    let (temp, store) = temp_store();
    fs::write(temp.path().join(INDEX_FILENAME), "").unwrap();
    assert!(store.load_index().is_err());
  }

  #[test]
  fn load_index_handles_unsupported_version() {
    let (temp, store) = temp_store();
    fs::write(
      temp.path().join(INDEX_FILENAME),
      r#"{"version": 99999, "snapshots": [], "current": null}"#,
    )
    .unwrap();
    assert!(matches!(store.load_index(), Err(StateError::UnsupportedVersion(99999))));
  }

  #[test]
  fn load_current_handles_missing_snapshot_file() {
    let (temp, store) = temp_store();
    let mut index = StateIndex::new();
    index.upsert(SnapshotMetadata {
      id: "gone".to_string(),
      created_at: 1,
      serial: 1,
      resource_count: 0,
    });
    index.current = Some("gone".to_string());
    fs::write(
      temp.path().join(INDEX_FILENAME),
      serde_json::to_string_pretty(&index).unwrap(),
    )
    .unwrap();

    assert!(matches!(store.load_current(), Err(StateError::NotFound(_))));
  }
}
