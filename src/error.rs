use crate::domain::job::{ItemError, JobId, JobStatus};
use crate::domain::validation::ValidationIssue;
use axum::http::StatusCode;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the batch engine to its callers.
#[derive(Error, Diagnostic, Debug)]
pub enum BatchError {
    #[error("batch failed validation with {} issue(s)", .0.len())]
    #[diagnostic(
        code(bulkpay::validation),
        help("fix every listed issue and submit the batch again")
    )]
    Validation(Vec<ValidationIssue>),

    #[error("cannot {action} job {job_id} while it is {status}")]
    #[diagnostic(code(bulkpay::invalid_state))]
    InvalidState {
        job_id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("job {job_id} is {status}; its items can no longer be changed")]
    #[diagnostic(code(bulkpay::immutable_job))]
    ImmutableJob { job_id: JobId, status: JobStatus },

    #[error("job {0} not found")]
    #[diagnostic(code(bulkpay::not_found))]
    JobNotFound(JobId),

    #[error("job store unavailable: {0}")]
    #[diagnostic(code(bulkpay::persistence))]
    Persistence(String),

    #[error("CSV error: {0}")]
    #[diagnostic(code(bulkpay::csv))]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(bulkpay::io))]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    #[diagnostic(code(bulkpay::serialization))]
    Serialization(#[from] serde_json::Error),
}

impl BatchError {
    /// HTTP status the REST surface answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidState { .. } | Self::ImmutableJob { .. } => StatusCode::CONFLICT,
            Self::JobNotFound(_) => StatusCode::NOT_FOUND,
            Self::Csv(_) | Self::Serialization(_) => StatusCode::BAD_REQUEST,
            Self::Persistence(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, used as the `error` field of REST bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvalidState { .. } => "invalid_state",
            Self::ImmutableJob { .. } => "immutable_job",
            Self::JobNotFound(_) => "not_found",
            Self::Persistence(_) => "persistence_error",
            Self::Csv(_) | Self::Serialization(_) => "bad_request",
            Self::Io(_) => "internal_error",
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for BatchError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

/// Failure reported by the payment backend for a single submission.
///
/// Retryable failures are transient (network, timeouts, backend overload);
/// terminal failures are permanent rejections such as insufficient funds.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("retryable failure {code}: {message}")]
    Retryable { code: String, message: String },
    #[error("terminal failure {code}: {message}")]
    Terminal { code: String, message: String },
}

impl ExecutionError {
    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Retryable {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn terminal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Terminal {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::retryable(
            "TIMEOUT",
            format!("payment backend did not answer within {after:?}"),
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

impl From<ExecutionError> for ItemError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Retryable { code, message }
            | ExecutionError::Terminal { code, message } => ItemError { code, message },
        }
    }
}
