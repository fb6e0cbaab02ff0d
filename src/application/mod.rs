//! Application layer: runs jobs against the domain ports.
//!
//! `BatchService` is the entry point used by the CLI and the REST surface.
//! It delegates execution to the `BatchOrchestrator`, which keeps one bounded
//! worker pool per job and drives each item through the `ItemExecutor`.

pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod service;
