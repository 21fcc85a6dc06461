/// Application name, used for data directories.
pub const APP_NAME: &str = "stackflow";

/// Length of the truncated content hashes used for plan ids.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default desired-state file name.
pub const DEFAULT_STACK_FILE: &str = "stack.yaml";

/// Stack name used when a desired-state file does not declare one.
pub const DEFAULT_STACK_NAME: &str = "stack";

/// Version of the on-disk state file format.
pub const STATE_FORMAT_VERSION: u32 = 1;
