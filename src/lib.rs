//! Batch payment execution engine.
//!
//! A batch of payment instructions is submitted as a job, validated, then
//! executed by a bounded worker pool against a payment backend, with
//! retries, pause/resume/cancel and crash recovery. See
//! [`application::service::BatchService`] for the entry point.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod telemetry;
