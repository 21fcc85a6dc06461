//! stackflow-lib: Core types and logic for stackflow
//!
//! This crate turns a declarative description of storage buckets, bucket
//! policies and a promotion pipeline into converged infrastructure:
//! - `model`: desired-state declarations, validation and resource compilation
//! - `policy`: policy documents and two-phase reference resolution
//! - `graph`: dependency graph, cycle detection and execution waves
//! - `plan`: diffing desired resources against the last-known state
//! - `execute`: applying a plan against a `Provider`, with checkpointed state
//! - `outputs`: derived values exported after apply
//! - `state`: snapshot storage and locking for the last-known state

pub mod config;
pub mod consts;
pub mod eval;
pub mod execute;
pub mod graph;
pub mod model;
pub mod outputs;
pub mod placeholder;
pub mod plan;
pub mod platform;
pub mod policy;
pub mod provider;
pub mod state;
pub mod util;
