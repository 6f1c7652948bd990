//! Raw failure signals reported by transports
//!
//! Transports never build portable errors themselves. They report the
//! structured status their protocol produced, and `error_map` decides what
//! that status means for the operation at hand.

use std::fmt;
use std::io;

/// Result type alias for transport primitives
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// SFTP status codes (draft-ietf-secsh-filexfer-13, section 9.1)
pub mod sftp_status {
    pub const EOF: u32 = 1;
    pub const NO_SUCH_FILE: u32 = 2;
    pub const PERMISSION_DENIED: u32 = 3;
    pub const FAILURE: u32 = 4;
    pub const BAD_MESSAGE: u32 = 5;
    pub const OP_UNSUPPORTED: u32 = 8;
    pub const NO_SUCH_PATH: u32 = 10;
    pub const FILE_ALREADY_EXISTS: u32 = 11;
    pub const WRITE_PROTECT: u32 = 12;
    pub const DIR_NOT_EMPTY: u32 = 18;
    pub const NOT_A_DIRECTORY: u32 = 19;
    pub const FILE_IS_A_DIRECTORY: u32 = 24;
}

/// NTSTATUS values returned by SMB2 servers
pub mod nt_status {
    pub const UNSUCCESSFUL: u32 = 0xC000_0001;
    pub const NO_SUCH_FILE: u32 = 0xC000_000F;
    pub const ACCESS_DENIED: u32 = 0xC000_0022;
    pub const OBJECT_NAME_INVALID: u32 = 0xC000_0033;
    pub const OBJECT_NAME_NOT_FOUND: u32 = 0xC000_0034;
    pub const OBJECT_NAME_COLLISION: u32 = 0xC000_0035;
    pub const OBJECT_PATH_NOT_FOUND: u32 = 0xC000_003A;
    pub const LOGON_FAILURE: u32 = 0xC000_006D;
    pub const NOT_SUPPORTED: u32 = 0xC000_00BB;
    pub const FILE_IS_A_DIRECTORY: u32 = 0xC000_00BA;
    pub const DIRECTORY_NOT_EMPTY: u32 = 0xC000_0101;
    pub const NOT_A_DIRECTORY: u32 = 0xC000_0103;
}

/// Structured backend signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// SFTP status code
    Sftp(u32),
    /// SMB NTSTATUS
    Smb(u32),
    /// HTTP response status and reason phrase
    Http { code: u16, phrase: String },
    /// Local or socket I/O failure inside the client library
    Io(io::ErrorKind),
    /// Server refused the credentials
    AuthRejected,
    /// Primitive not offered by this transport
    Unsupported,
}

/// Failure reported by a transport primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub status: Status,
    /// Diagnostic text from the client library
    pub message: String,
}

impl TransportError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn sftp(code: u32, message: impl Into<String>) -> Self {
        Self::new(Status::Sftp(code), message)
    }

    pub fn smb(code: u32, message: impl Into<String>) -> Self {
        Self::new(Status::Smb(code), message)
    }

    pub fn http(code: u16, phrase: impl Into<String>) -> Self {
        let phrase = phrase.into();
        Self {
            message: format!("HTTP {} {}", code, phrase),
            status: Status::Http { code, phrase },
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(Status::AuthRejected, message)
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(Status::Unsupported, format!("{} is not supported", operation))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Status::Sftp(code) => write!(f, "SFTP status {}: {}", code, self.message),
            Status::Smb(code) => write!(f, "NTSTATUS {:#010x}: {}", code, self.message),
            Status::Http { .. } => f.write_str(&self.message),
            Status::Io(kind) => write!(f, "I/O error ({:?}): {}", kind, self.message),
            Status::AuthRejected => write!(f, "Authentication rejected: {}", self.message),
            Status::Unsupported => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::new(Status::Io(err.kind()), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = TransportError::sftp(sftp_status::NO_SUCH_FILE, "no such file");
        assert_eq!(err.to_string(), "SFTP status 2: no such file");

        let err = TransportError::smb(nt_status::ACCESS_DENIED, "STATUS_ACCESS_DENIED");
        assert_eq!(err.to_string(), "NTSTATUS 0xc0000022: STATUS_ACCESS_DENIED");

        let err = TransportError::http(423, "Locked");
        assert_eq!(err.to_string(), "HTTP 423 Locked");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: TransportError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(err.status, Status::Io(io::ErrorKind::TimedOut));
        assert!(err.message.contains("slow"));
    }
}
