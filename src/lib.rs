//! Task Delegation Core — scheduler, isolation engine, and
//! result-merging pipeline for running model-backed sub-agents.
//!
//! The surrounding coding-agent runtime (model gateway, tool runtime,
//! session store, CLI/TUI) is treated as an external collaborator; see
//! `gateway` for the traits this crate consumes from it.

pub mod config;
pub mod error;
pub mod executor;
pub mod failpoints;
pub mod gateway;
pub mod isolation;
pub mod model;
pub mod pending;
pub mod reconcile;
pub mod refs;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod telemetry;
