//! Translation of transport failures into portable errors
//!
//! The table below is keyed on the structured status each protocol
//! reports. Message text is only consulted for HTTP responses whose
//! status code is not in the table, where the reason phrase is all the
//! server gave us.

use crate::backend::error::{nt_status, sftp_status};
use crate::backend::{Status, TransportError};
use crate::error::FsError;

/// Orchestrator operation a failure occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Stat,
    List,
    Mkdir,
    Delete,
    Read,
    Write,
    SetPermissions,
    Copy,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Stat => "stat",
            Operation::List => "list",
            Operation::Mkdir => "mkdir",
            Operation::Delete => "delete",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::SetPermissions => "set_permissions",
            Operation::Copy => "copy",
        }
    }
}

/// What the caller knew when the failure happened
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub operation: Operation,
    pub path: &'a str,
    pub endpoint: &'a str,
    /// Result of a stat taken before the failing call, if any
    pub known_directory: Option<bool>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(operation: Operation, path: &'a str, endpoint: &'a str) -> Self {
        Self {
            operation,
            path,
            endpoint,
            known_directory: None,
        }
    }

    pub fn with_known_directory(mut self, is_dir: bool) -> Self {
        self.known_directory = Some(is_dir);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    NotFound,
    AlreadyExists,
    Denied,
    NotEmpty,
    Auth,
    Unsupported,
    /// Backend said "it failed" and nothing more
    Failure,
}

fn classify(status: &Status, operation: Operation) -> Class {
    match status {
        Status::Sftp(code) => match *code {
            sftp_status::NO_SUCH_FILE | sftp_status::NO_SUCH_PATH => Class::NotFound,
            sftp_status::PERMISSION_DENIED | sftp_status::WRITE_PROTECT => Class::Denied,
            sftp_status::FILE_ALREADY_EXISTS => Class::AlreadyExists,
            sftp_status::DIR_NOT_EMPTY => Class::NotEmpty,
            sftp_status::OP_UNSUPPORTED => Class::Unsupported,
            _ => Class::Failure,
        },
        Status::Smb(code) => match *code {
            nt_status::OBJECT_NAME_NOT_FOUND
            | nt_status::OBJECT_PATH_NOT_FOUND
            | nt_status::NO_SUCH_FILE => Class::NotFound,
            nt_status::ACCESS_DENIED => Class::Denied,
            nt_status::OBJECT_NAME_COLLISION => Class::AlreadyExists,
            nt_status::DIRECTORY_NOT_EMPTY => Class::NotEmpty,
            nt_status::LOGON_FAILURE => Class::Auth,
            nt_status::NOT_SUPPORTED => Class::Unsupported,
            _ => Class::Failure,
        },
        Status::Http { code, phrase } => classify_http(*code, phrase, operation),
        Status::Io(kind) => match kind {
            std::io::ErrorKind::NotFound => Class::NotFound,
            std::io::ErrorKind::PermissionDenied => Class::Denied,
            std::io::ErrorKind::AlreadyExists => Class::AlreadyExists,
            std::io::ErrorKind::Unsupported => Class::Unsupported,
            _ => Class::Failure,
        },
        Status::AuthRejected => Class::Auth,
        Status::Unsupported => Class::Unsupported,
    }
}

fn classify_http(code: u16, phrase: &str, operation: Operation) -> Class {
    match code {
        404 | 410 => Class::NotFound,
        401 => Class::Auth,
        403 | 423 => Class::Denied,
        // MKCOL on an existing resource
        405 if operation == Operation::Mkdir => Class::AlreadyExists,
        405 | 501 => Class::Unsupported,
        // Missing intermediate collection
        409 if matches!(operation, Operation::Mkdir | Operation::Write) => Class::NotFound,
        // COPY without Overwrite onto an existing target
        412 => Class::AlreadyExists,
        _ if (200..300).contains(&code) => Class::Failure,
        _ => classify_phrase(phrase),
    }
}

fn classify_phrase(phrase: &str) -> Class {
    let phrase = phrase.to_ascii_lowercase();
    if phrase.contains("not found") {
        Class::NotFound
    } else if phrase.contains("forbidden") || phrase.contains("denied") {
        Class::Denied
    } else if phrase.contains("unauthorized") {
        Class::Auth
    } else if phrase.contains("exists") {
        Class::AlreadyExists
    } else {
        Class::Failure
    }
}

/// Translate `err` into a portable error for the operation in `ctx`
pub fn map_error(err: TransportError, ctx: &ErrorContext<'_>) -> FsError {
    let class = classify(&err.status, ctx.operation);
    tracing::trace!(
        operation = ctx.operation.as_str(),
        path = ctx.path,
        status = ?err.status,
        class = ?class,
        "mapping transport error"
    );

    let path = ctx.path.to_string();
    match class {
        Class::NotFound => FsError::NotFound { path },
        Class::AlreadyExists => FsError::AlreadyExists { path },
        Class::Denied => FsError::AccessDenied { path },
        Class::NotEmpty => FsError::DirectoryNotEmpty { path },
        Class::Auth => FsError::AuthenticationFailed {
            endpoint: ctx.endpoint.to_string(),
            message: err.message,
        },
        Class::Unsupported => FsError::unsupported(ctx.endpoint, ctx.operation.as_str()),
        Class::Failure
            if ctx.operation == Operation::Delete && ctx.known_directory == Some(true) =>
        {
            FsError::DirectoryNotEmpty { path }
        }
        Class::Failure => FsError::IoFailure {
            path,
            message: err.to_string(),
        },
    }
}

/// True if `status` says the target of a create already exists
pub fn is_already_exists(status: &Status, operation: Operation) -> bool {
    classify(status, operation) == Class::AlreadyExists
}

/// True if `status` carries no more information than "it failed"
pub(crate) fn is_generic_failure(status: &Status, operation: Operation) -> bool {
    classify(status, operation) == Class::Failure
}
