//! Explicit deployment environment.
//!
//! Region and account are never read implicitly while planning or applying.
//! The CLI resolves them once (flag or environment variable first, then the
//! desired-state file) and passes the resulting [`Environment`] down.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment settings as written in a desired-state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentDecl {
  #[serde(default)]
  pub region: Option<String>,
  #[serde(default)]
  pub account: Option<String>,
}

/// Values supplied on the command line or through environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOverrides {
  pub region: Option<String>,
  pub account: Option<String>,
}

/// The resolved environment a stack is planned and applied in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
  pub region: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub account: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("no region configured (use --region, STACKFLOW_REGION or environment.region)")]
  MissingRegion,

  #[error("invalid region '{0}': expected lowercase letters, digits and '-'")]
  InvalidRegion(String),

  #[error("invalid account '{0}': expected 12 digits")]
  InvalidAccount(String),
}

impl Environment {
  pub fn new(region: impl Into<String>) -> Self {
    Self {
      region: region.into(),
      account: None,
    }
  }

  pub fn with_account(mut self, account: impl Into<String>) -> Self {
    self.account = Some(account.into());
    self
  }

  /// Resolve the environment, preferring explicit overrides over file values.
  pub fn resolve(overrides: &EnvironmentOverrides, declared: &EnvironmentDecl) -> Result<Self, ConfigError> {
    let region = overrides
      .region
      .clone()
      .or_else(|| declared.region.clone())
      .filter(|r| !r.is_empty())
      .ok_or(ConfigError::MissingRegion)?;

    if !region
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
      return Err(ConfigError::InvalidRegion(region));
    }

    let account = overrides
      .account
      .clone()
      .or_else(|| declared.account.clone())
      .filter(|a| !a.is_empty());

    if let Some(account) = &account
      && (account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()))
    {
      return Err(ConfigError::InvalidAccount(account.clone()));
    }

    Ok(Self { region, account })
  }

  /// Look up a value for an `$${env:<key>}` placeholder.
  pub fn get(&self, key: &str) -> Option<&str> {
    match key {
      "region" => Some(self.region.as_str()),
      "account" => self.account.as_deref(),
      _ => None,
    }
  }
}
