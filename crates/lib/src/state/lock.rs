//! Advisory locking of a stack's state directory.
//!
//! `apply` and `destroy` hold an exclusive lock for their whole run and leave a
//! note saying who they are and which state serial they started from. `plan`
//! and `status` take a shared lock so they never read a state that is halfway
//! through a checkpoint.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::storage::StateStore;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
  Shared,
  Exclusive,
}

/// The stack operation holding a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockCommand {
  Plan,
  Status,
  Apply,
  Destroy,
}

impl LockCommand {
  pub fn as_str(self) -> &'static str {
    match self {
      LockCommand::Plan => "plan",
      LockCommand::Status => "status",
      LockCommand::Apply => "apply",
      LockCommand::Destroy => "destroy",
    }
  }

  fn mode(self) -> LockMode {
    match self {
      LockCommand::Plan | LockCommand::Status => LockMode::Shared,
      LockCommand::Apply | LockCommand::Destroy => LockMode::Exclusive,
    }
  }
}

/// Who holds an exclusive lock, as written into the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub stack: String,
  pub command: LockCommand,
  pub pid: u32,
  /// Serial of the state the holder started from.
  pub serial: u64,
  pub since_unix: u64,
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "`{}` (pid {}, from state serial {}, since unix time {})",
      self.command.as_str(),
      self.pid,
      self.serial,
      self.since_unix
    )
  }
}

fn holder_suffix(holder: &Option<LockHolder>) -> String {
  match holder {
    Some(holder) => format!(" by {holder}"),
    None => String::new(),
  }
}

#[derive(Debug, Error)]
pub enum StateLockError {
  #[error(
    "stack '{stack}' is locked{}\nIf no stackflow process is running, remove the lock file: {}",
    holder_suffix(.holder),
    .lock_path.display()
  )]
  Locked {
    stack: String,
    holder: Option<LockHolder>,
    lock_path: PathBuf,
  },

  #[error("failed to lock state of stack '{stack}': {source}")]
  Io {
    stack: String,
    #[source]
    source: io::Error,
  },
}

/// A held lock on a stack's state; released when dropped.
#[derive(Debug)]
pub struct StateLock {
  file: File,
  mode: LockMode,
}

impl Drop for StateLock {
  fn drop(&mut self) {
    // Clear the holder note so a later shared holder is not reported as this one.
    if self.mode == LockMode::Exclusive
      && let Err(error) = self.file.set_len(0)
    {
      debug!(%error, "could not clear lock holder");
    }
  }
}

impl StateStore {
  fn lock_path(&self) -> PathBuf {
    self.base_path().join(LOCK_FILENAME)
  }

  /// Lock this store for `command`, creating the state directory if needed.
  ///
  /// An exclusive lock records a [`LockHolder`] so a contending process can
  /// say who is in the way.
  pub fn lock(&self, stack: &str, command: LockCommand) -> Result<StateLock, StateLockError> {
    let io_error = |source| StateLockError::Io {
      stack: stack.to_string(),
      source,
    };
    let mode = command.mode();
    let lock_path = self.lock_path();

    fs::create_dir_all(self.base_path()).map_err(io_error)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(io_error)?;

    if !try_lock(&file, mode).map_err(io_error)? {
      let holder = self.holder();
      warn!(stack, command = command.as_str(), holder = ?holder, "state is locked");
      return Err(StateLockError::Locked {
        stack: stack.to_string(),
        holder,
        lock_path,
      });
    }

    if mode == LockMode::Exclusive {
      let serial = match self.load_current() {
        Ok(state) => state.map_or(0, |s| s.serial),
        Err(_) => 0,
      };
      let holder = LockHolder {
        stack: stack.to_string(),
        command,
        pid: std::process::id(),
        serial,
        since_unix: SystemTime::now()
          .duration_since(UNIX_EPOCH)
          .unwrap_or_default()
          .as_secs(),
      };
      write_holder(&file, &holder).map_err(io_error)?;
    }

    debug!(stack, command = command.as_str(), ?mode, "acquired state lock");
    Ok(StateLock { file, mode })
  }

  /// The last recorded exclusive holder, if the lock file names one.
  pub fn holder(&self) -> Option<LockHolder> {
    let contents = fs::read_to_string(self.lock_path()).ok()?;
    serde_json::from_str(&contents).ok()
  }
}

fn write_holder(mut file: &File, holder: &LockHolder) -> io::Result<()> {
  file.set_len(0)?;
  serde_json::to_writer_pretty(file, holder).map_err(io::Error::other)?;
  file.flush()
}

/// Take the lock without blocking. `Ok(false)` means another process holds it.
#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<bool> {
  use rustix::fs::{FlockOperation, flock};
  use rustix::io::Errno;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  match flock(file, operation) {
    Ok(()) => Ok(true),
    Err(errno) if errno == Errno::WOULDBLOCK => Ok(false),
    Err(errno) => Err(errno.into()),
  }
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<bool> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: the handle belongs to an open file and a zeroed OVERLAPPED is valid.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped) != 0
  };
  if locked {
    return Ok(true);
  }
  let error = io::Error::last_os_error();
  if error.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    Ok(false)
  } else {
    Err(error)
  }
}
