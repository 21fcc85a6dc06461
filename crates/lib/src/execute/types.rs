//! Types for plan execution.
//!
//! This module defines the error types, the report returned after an apply
//! and the configuration that controls parallelism and convergence polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::model::ResourceAddress;
use crate::plan::ChangeAction;
use crate::provider::{Operation, ProviderError};
use crate::state::StateError;

use super::resolver::ResolveError;

/// Why a single entry could not be applied.
#[derive(Debug, Error)]
pub enum ApplyError {
  /// The provider rejected an operation.
  #[error("{operation} {address} failed: {source}")]
  Provider {
    address: ResourceAddress,
    operation: Operation,
    #[source]
    source: ProviderError,
  },

  /// Attributes still reference something that never converged.
  #[error("{address}: {source}")]
  Resolve {
    address: ResourceAddress,
    #[source]
    source: ResolveError,
  },

  /// The provider accepted the operation but `describe` never confirmed it.
  #[error("{address} did not converge after {polls} polls ({operation})")]
  NotConverged {
    address: ResourceAddress,
    operation: Operation,
    polls: u32,
  },
}

impl ApplyError {
  pub fn address(&self) -> &ResourceAddress {
    match self {
      ApplyError::Provider { address, .. }
      | ApplyError::Resolve { address, .. }
      | ApplyError::NotConverged { address, .. } => address,
    }
  }
}

/// Errors that stop execution outright, as opposed to an entry failing.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// Persisting the state after an entry failed.
  #[error("failed to checkpoint state: {0}")]
  Checkpoint(#[from] StateError),

  /// An apply task panicked or was aborted.
  #[error("apply task failed: {0}")]
  TaskJoin(String),
}

/// One entry of a report, by position in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
  pub index: usize,
  pub address: ResourceAddress,
  pub action: ChangeAction,
}

#[derive(Debug)]
pub struct FailedEntry {
  pub entry: ReportEntry,
  pub error: ApplyError,
}

/// Outcome of executing a plan.
///
/// Every plan entry ends up in exactly one of `succeeded`, `failed`,
/// `not_attempted` or `unchanged`.
#[derive(Debug, Default)]
pub struct ApplyReport {
  pub succeeded: Vec<ReportEntry>,
  pub failed: Vec<FailedEntry>,
  pub not_attempted: Vec<ReportEntry>,
  pub unchanged: Vec<ReportEntry>,
  /// Physical ids of retained buckets that were forgotten instead of deleted.
  pub retained: Vec<String>,
  pub cancelled: bool,
}

impl ApplyReport {
  /// Returns true if every entry either applied or needed nothing.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.not_attempted.is_empty() && !self.cancelled
  }

  pub fn total(&self) -> usize {
    self.succeeded.len() + self.failed.len() + self.not_attempted.len() + self.unchanged.len()
  }

  pub(crate) fn sort(&mut self) {
    self.succeeded.sort_by_key(|e| e.index);
    self.failed.sort_by_key(|f| f.entry.index);
    self.not_attempted.sort_by_key(|e| e.index);
    self.unchanged.sort_by_key(|e| e.index);
  }
}

/// Configuration for plan execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of entries of one wave applied at the same time.
  /// `1` applies strictly in plan order.
  pub parallelism: usize,

  /// Delay between two convergence polls.
  pub poll_interval: Duration,

  /// Polls before an entry is reported as not converged.
  pub max_polls: u32,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      poll_interval: Duration::from_millis(250),
      max_polls: 40,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Shared cancellation request, checked between entries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}
