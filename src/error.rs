/*!
 * Portable error types for farpath
 *
 * Every backend failure is reported through one of these kinds. Raw
 * transport errors never cross the public API; see `error_map`.
 */

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

/// Portable filesystem error
#[derive(Error, Debug)]
pub enum FsError {
    /// Path does not exist on the endpoint
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// Path already exists (exclusive create, copy without replace)
    #[error("path already exists: {path}")]
    AlreadyExists { path: String },

    /// Backend refused access to the path
    #[error("access denied: {path}")]
    AccessDenied { path: String },

    /// Directory could not be removed because it still has entries
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    /// Credentials were rejected while opening a session
    #[error("authentication failed for {endpoint}: {message}")]
    AuthenticationFailed { endpoint: String, message: String },

    /// Malformed path, or normalization above the root
    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Path algebra precondition violated (mixed endpoints or absoluteness)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation cannot be expressed on this backend
    #[error("operation '{operation}' not supported by {backend}")]
    UnsupportedOperation { backend: String, operation: String },

    /// Endpoint was closed; it cannot be used again
    #[error("endpoint closed: {endpoint}")]
    EndpointClosed { endpoint: String },

    /// Configuration or URI syntax problem
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all carrying the backend diagnostic
    #[error("I/O failure on {path}: {message}")]
    IoFailure { path: String, message: String },
}

/// Fieldless discriminant of [`FsError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    AccessDenied,
    DirectoryNotEmpty,
    AuthenticationFailed,
    InvalidPath,
    InvalidArgument,
    UnsupportedOperation,
    EndpointClosed,
    Config,
    IoFailure,
}

impl FsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::NotFound { .. } => ErrorKind::NotFound,
            FsError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            FsError::AccessDenied { .. } => ErrorKind::AccessDenied,
            FsError::DirectoryNotEmpty { .. } => ErrorKind::DirectoryNotEmpty,
            FsError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            FsError::InvalidPath { .. } => ErrorKind::InvalidPath,
            FsError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FsError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            FsError::EndpointClosed { .. } => ErrorKind::EndpointClosed,
            FsError::Config(_) => ErrorKind::Config,
            FsError::IoFailure { .. } => ErrorKind::IoFailure,
        }
    }

    /// Check if this error indicates the resource was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound { .. })
    }

    /// Check if this error is a local precondition violation rather than
    /// an environment failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            FsError::InvalidPath { .. } | FsError::InvalidArgument(_)
        )
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FsError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        FsError::UnsupportedOperation {
            backend: backend.into(),
            operation: operation.into(),
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound {
                path: String::new(),
            },
            io::ErrorKind::PermissionDenied => FsError::AccessDenied {
                path: String::new(),
            },
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists {
                path: String::new(),
            },
            _ => FsError::IoFailure {
                path: String::new(),
                message: err.to_string(),
            },
        }
    }
}
