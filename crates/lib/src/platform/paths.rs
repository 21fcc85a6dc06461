use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Environment variable that overrides the data directory.
pub const HOME_ENV: &str = "STACKFLOW_HOME";

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
}

/// Returns the directory for data files for the application
///
/// `STACKFLOW_HOME` wins over the platform default.
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Ok(home) = std::env::var(HOME_ENV) {
    return PathBuf::from(home);
  }
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Roaming"))
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
///
/// `STACKFLOW_HOME` wins over `XDG_DATA_HOME`.
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Ok(home) = std::env::var(HOME_ENV) {
    return PathBuf::from(home);
  }
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Directory holding the state of every stack.
pub fn stacks_dir() -> PathBuf {
  data_dir().join("stacks")
}

/// Directory holding the state snapshots and lock file of one stack.
pub fn stack_dir(stack: &str) -> PathBuf {
  stacks_dir().join(stack)
}

/// Default root of the filesystem-backed provider.
pub fn provider_dir() -> PathBuf {
  data_dir().join("provider")
}
