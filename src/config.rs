/*!
 * Configuration types for farpath
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::endpoint::Scheme;
use crate::error::{FsError, Result};
use crate::session::SessionPolicy;

/// Top-level configuration shared by the registry, endpoints and sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsConfig {
    /// Logging setup
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session lifetime policy per backend
    #[serde(default)]
    pub sessions: SessionPolicies,

    /// Connect/handshake timeout handed to the transports, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Directory for copy staging files (None = system temp dir)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Prefix of the environment variables consulted when a URI carries no
    /// credentials, e.g. `FARPATH_SMB_USER` then `FARPATH_USER`
    #[serde(default = "default_env_prefix")]
    pub credentials_env_prefix: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            sessions: SessionPolicies::default(),
            connect_timeout_secs: default_connect_timeout(),
            staging_dir: None,
            credentials_env_prefix: default_env_prefix(),
        }
    }
}

impl FsConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FsError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| FsError::Config(format!("invalid config: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| FsError::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            FsError::Config(format!("cannot write {}: {}", path.display(), e))
        })
    }

    /// Session policy that applies to endpoints of `scheme`
    pub fn session_policy(&self, scheme: Scheme) -> SessionPolicy {
        match scheme {
            Scheme::Sftp => self.sessions.sftp,
            Scheme::Smb => self.sessions.smb,
            Scheme::WebDav | Scheme::WebDavs => self.sessions.webdav,
            Scheme::Memory => self.sessions.memory,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Per-backend session lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicies {
    #[serde(default = "transient")]
    pub sftp: SessionPolicy,

    #[serde(default = "transient")]
    pub smb: SessionPolicy,

    /// HTTP clients pool and multiplex connections, so one client lives
    /// as long as the endpoint
    #[serde(default = "persistent")]
    pub webdav: SessionPolicy,

    #[serde(default = "transient")]
    pub memory: SessionPolicy,
}

impl Default for SessionPolicies {
    fn default() -> Self {
        Self {
            sftp: SessionPolicy::Transient,
            smb: SessionPolicy::Transient,
            webdav: SessionPolicy::Persistent,
            memory: SessionPolicy::Transient,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_connect_timeout() -> u64 {
    30
}

fn default_env_prefix() -> String {
    "FARPATH".to_string()
}

fn transient() -> SessionPolicy {
    SessionPolicy::Transient
}

fn persistent() -> SessionPolicy {
    SessionPolicy::Persistent
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = FsConfig::default();
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.credentials_env_prefix, "FARPATH");
        assert!(config.staging_dir.is_none());
        assert_eq!(config.logging.log_level, LogLevel::Info);
    }

    #[test]
    fn test_default_session_policies() {
        let config = FsConfig::default();
        assert_eq!(config.session_policy(Scheme::Sftp), SessionPolicy::Transient);
        assert_eq!(config.session_policy(Scheme::Smb), SessionPolicy::Transient);
        assert_eq!(config.session_policy(Scheme::WebDav), SessionPolicy::Persistent);
        assert_eq!(config.session_policy(Scheme::WebDavs), SessionPolicy::Persistent);
    }

    #[test]
    fn test_partial_toml() {
        let toml_str = r#"
connect_timeout_secs = 5

[logging]
log_level = "debug"

[sessions]
sftp = "persistent"
"#;
        let config = FsConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.connect_timeout_secs, 5);
        assert_eq!(config.logging.log_level, LogLevel::Debug);
        assert_eq!(config.sessions.sftp, SessionPolicy::Persistent);
        // Untouched fields keep their defaults
        assert_eq!(config.sessions.webdav, SessionPolicy::Persistent);
        assert_eq!(config.credentials_env_prefix, "FARPATH");
    }

    #[test]
    fn test_invalid_toml() {
        let err = FsConfig::from_toml_str("connect_timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, FsError::Config(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let mut config = FsConfig::default();
        config.staging_dir = Some(PathBuf::from("/var/tmp/farpath"));
        config.sessions.smb = SessionPolicy::Persistent;

        let file = NamedTempFile::new().unwrap();
        config.to_file(file.path()).unwrap();
        let loaded = FsConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
