use std::io;
use std::path::PathBuf;
use thiserror::Error;

// Import module-level errors for AppError
use crate::config::settings::ConfigError;
use crate::ops::request::RequestError;
use crate::security::validator::{RejectionCategory, ValidationError};

/// Errors that can occur while dispatching an operation
#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No repository specified")]
    MissingRepository,

    #[error("Unknown repository: {0}")]
    UnknownRepository(String),

    #[error("Repository path does not exist: {}", .0.display())]
    RepositoryPathMissing(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Operation '{0}' does not support streaming")]
    UnsupportedStreaming(&'static str),

    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How a failed operation should be reported to a network caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    Internal,
}

impl OperationError {
    pub fn status_kind(&self) -> ErrorKind {
        match self {
            OperationError::Validation(_)
            | OperationError::MissingRepository
            | OperationError::NotAFile(_)
            | OperationError::UnsupportedStreaming(_) => ErrorKind::BadRequest,
            OperationError::UnknownRepository(_)
            | OperationError::RepositoryPathMissing(_)
            | OperationError::FileNotFound(_) => ErrorKind::NotFound,
            OperationError::PermissionDenied(_) => ErrorKind::Forbidden,
            OperationError::Spawn { .. } | OperationError::Io(_) => ErrorKind::Internal,
        }
    }

    /// The rejection category, if this is a validation failure
    pub fn rejection(&self) -> Option<RejectionCategory> {
        match self {
            OperationError::Validation(e) => Some(e.category()),
            _ => None,
        }
    }
}

/// Top-level application error that wraps all module-specific errors
///
/// Used by the binary's startup path; request handling never produces one.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for dispatched operations
pub type OperationResult<T> = std::result::Result<T, OperationError>;

/// Result type for application-level operations
pub type AppResult<T> = std::result::Result<T, AppError>;
