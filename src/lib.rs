/*!
 * farpath - remote filesystems behind one path type
 *
 * Files on SFTP servers, SMB shares and WebDAV collections are addressed
 * through a single [`RemotePath`] and manipulated through [`RemoteFs`]:
 * - Pure path algebra (normalize, resolve, relativize, compare)
 * - One cached endpoint per scheme/host/port/principal
 * - Transient or persistent sessions per backend
 * - Portable attributes and POSIX permission sets
 * - Protocol status codes mapped to one error taxonomy
 *
 * Network protocols are behind the `sftp`, `smb` and `webdav` features;
 * the in-memory backend is always available.
 */

pub mod attributes;
pub mod backend;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod error_map;
pub mod fs;
pub mod logging;
pub mod path;
pub mod permissions;
pub mod registry;
pub mod session;
pub mod uri;

// Re-export commonly used types
pub use attributes::{FileAttributes, FileType};
pub use config::{FsConfig, LogLevel, LoggingConfig};
pub use endpoint::{Credentials, Endpoint, EndpointKey, EndpointRef, EndpointTarget, Scheme};
pub use error::{ErrorKind, FsError, Result};
pub use fs::{AccessMode, CopyOptions, DirectoryListing, RemoteFs, WriteMode};
pub use path::RemotePath;
pub use permissions::PermissionSet;
pub use registry::{global_registry, init_global, EndpointRegistry};
pub use session::{Session, SessionPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
