//! Content hashing for plans and other serialisable values.
//!
//! `ObjectHash` is a truncated SHA-256 of the JSON serialisation. Every type
//! hashed this way uses ordered maps, so equal values hash equally.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A content-addressed hash identifying a unique object.
///
/// The hash is a 20-character lowercase hex prefix of the SHA-256 of the
/// JSON-serialized value, e.g. `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(ObjectHash(hash_str(&serialized)[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// Full lowercase hex SHA-256 of a string.
pub fn hash_str(input: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(input.as_bytes());
  format!("{:x}", hasher.finalize())
}
