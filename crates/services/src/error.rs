//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use trust_core::model::{ProgressError, StepNumber};

/// Errors emitted by `ProgressController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressServiceError {
    #[error("progress has not been loaded")]
    NotLoaded,
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `WorkflowEngine` navigation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkflowError {
    #[error("step {step} is outside the course (1..={total})")]
    OutOfRange { step: StepNumber, total: u32 },
    #[error("step {0} is locked until the previous step is completed")]
    StepLocked(StepNumber),
    #[error("course `{expected}` does not match the controller's course `{actual}`")]
    CourseMismatch { expected: String, actual: String },
    #[error(transparent)]
    Progress(#[from] ProgressServiceError),
}

/// Errors emitted by the minister RPC client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MinisterRpcError {
    #[error("invalid minister RPC endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("minister RPC response could not be decoded: {0}")]
    Decode(String),
    #[error("minister RPC returned status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    MinisterRpc(#[from] MinisterRpcError),
    #[error("unknown course `{0}`")]
    UnknownCourse(String),
}
