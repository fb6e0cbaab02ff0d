//! Batch payment domain: instructions, jobs and items, validation rules and
//! the ports to the job store and the payment backend.

pub mod instruction;
pub mod job;
pub mod ports;
pub mod validation;
