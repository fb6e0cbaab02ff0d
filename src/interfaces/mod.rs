//! Outer surfaces: CSV files for the CLI and the REST API.

pub mod csv;
pub mod http;
