//! SSH/SFTP transport
//!
//! Blocking access over `ssh2`. Each [`SftpTransport`] owns one SSH session
//! with one SFTP channel. Relative paths are sent as is and the server
//! resolves them against the login directory.

use secrecy::ExposeSecret;
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use super::error::{Status, TransportError, TransportResult};
use super::types::{RawEntry, RawKind, RawStat};
use super::{Connector, Transport};
use crate::config::FsConfig;
use crate::endpoint::{Credentials, EndpointKey};

/// libssh2: authentication failed
const SESSION_AUTH_FAILED: i32 = -18;
/// libssh2: public key unverified
const SESSION_PUBKEY_UNVERIFIED: i32 = -19;
/// libssh2: timeout
const SESSION_TIMEOUT: i32 = -9;

const DIR_MODE: i32 = 0o755;

fn sftp_error(err: ssh2::Error) -> TransportError {
    let status = match err.code() {
        ErrorCode::SFTP(code) => Status::Sftp(code as u32),
        ErrorCode::Session(SESSION_AUTH_FAILED) | ErrorCode::Session(SESSION_PUBKEY_UNVERIFIED) => {
            Status::AuthRejected
        }
        ErrorCode::Session(SESSION_TIMEOUT) => Status::Io(io::ErrorKind::TimedOut),
        ErrorCode::Session(_) => Status::Io(io::ErrorKind::Other),
    };
    TransportError::new(status, err.message())
}

fn convert_stat(stat: &FileStat) -> RawStat {
    let size = stat.size.unwrap_or(0);
    let file_type = stat.file_type();
    let kind = if file_type.is_dir() {
        RawKind::Directory
    } else if file_type.is_file() {
        RawKind::File
    } else if file_type.is_symlink() {
        RawKind::Symlink
    } else {
        RawKind::Other
    };

    let mut raw = RawStat::file(size).with_kind(kind);
    if let Some(mtime) = stat.mtime {
        raw = raw.with_modified(UNIX_EPOCH + Duration::from_secs(mtime));
    }
    if let Some(atime) = stat.atime {
        raw = raw.with_accessed(UNIX_EPOCH + Duration::from_secs(atime));
    }
    if let Some(perm) = stat.perm {
        raw = raw.with_permissions(perm);
    }
    raw
}

/// Opens SFTP sessions
#[derive(Debug, Default)]
pub struct SftpConnector;

impl SftpConnector {
    pub fn new() -> Self {
        Self
    }

    fn tcp_connect(key: &EndpointKey, timeout: Duration) -> TransportResult<TcpStream> {
        let addr = format!("{}:{}", key.host, key.port);
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", addr));
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(e) => last_err = e,
            }
        }
        Err(last_err.into())
    }

    fn authenticate(session: &Session, user: &str, credentials: &Credentials) -> TransportResult<()> {
        if let Some(key_file) = &credentials.key_file {
            let passphrase = credentials.password.as_ref().map(|p| p.expose_secret());
            session
                .userauth_pubkey_file(user, None, key_file, passphrase)
                .map_err(|e| TransportError::auth(format!("Key file authentication failed: {}", e)))?;
        } else if let Some(password) = &credentials.password {
            session
                .userauth_password(user, password.expose_secret())
                .map_err(|e| TransportError::auth(format!("Password authentication failed: {}", e)))?;
        } else {
            let mut agent = session
                .agent()
                .map_err(|e| TransportError::auth(format!("Failed to connect to SSH agent: {}", e)))?;
            agent
                .connect()
                .map_err(|e| TransportError::auth(format!("Failed to connect to SSH agent: {}", e)))?;
            agent.list_identities().map_err(|e| {
                TransportError::auth(format!("Failed to list SSH agent identities: {}", e))
            })?;
            let identities = agent.identities().map_err(|e| {
                TransportError::auth(format!("Failed to get SSH agent identities: {}", e))
            })?;
            let accepted = identities
                .iter()
                .any(|identity| agent.userauth(user, identity).is_ok());
            if !accepted {
                return Err(TransportError::auth("No valid identity found in SSH agent"));
            }
        }

        if !session.authenticated() {
            return Err(TransportError::auth("Authentication failed"));
        }
        Ok(())
    }
}

impl Connector for SftpConnector {
    fn connect(
        &self,
        key: &EndpointKey,
        credentials: &Credentials,
        config: &FsConfig,
    ) -> TransportResult<Box<dyn Transport>> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let tcp = Self::tcp_connect(key, timeout)?;
        tcp.set_read_timeout(Some(timeout)).ok();
        tcp.set_write_timeout(Some(timeout)).ok();

        let mut session = Session::new().map_err(sftp_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(sftp_error)?;

        Self::authenticate(&session, &key.principal, credentials)?;

        let sftp = session.sftp().map_err(sftp_error)?;
        tracing::debug!(host = %key.host, port = key.port, "SFTP channel open");
        Ok(Box::new(SftpTransport {
            session,
            sftp: Some(sftp),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "sftp"
    }
}

/// One SSH session with an SFTP channel
pub struct SftpTransport {
    session: Session,
    sftp: Option<Sftp>,
}

impl SftpTransport {
    fn sftp(&self) -> TransportResult<&Sftp> {
        self.sftp.as_ref().ok_or_else(|| {
            TransportError::new(Status::Io(io::ErrorKind::NotConnected), "SFTP channel closed")
        })
    }
}

impl Transport for SftpTransport {
    fn stat(&mut self, path: &str) -> TransportResult<RawStat> {
        let stat = self.sftp()?.stat(Path::new(path)).map_err(sftp_error)?;
        Ok(convert_stat(&stat))
    }

    fn list(&mut self, path: &str) -> TransportResult<Vec<RawEntry>> {
        let entries = self.sftp()?.readdir(Path::new(path)).map_err(sftp_error)?;
        Ok(entries
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                Some(RawEntry::new(name, convert_stat(&stat)))
            })
            .collect())
    }

    fn mkdir(&mut self, path: &str) -> TransportResult<()> {
        self.sftp()?.mkdir(Path::new(path), DIR_MODE).map_err(sftp_error)
    }

    fn remove(&mut self, path: &str, is_dir: bool) -> TransportResult<()> {
        let sftp = self.sftp()?;
        if is_dir {
            sftp.rmdir(Path::new(path)).map_err(sftp_error)
        } else {
            sftp.unlink(Path::new(path)).map_err(sftp_error)
        }
    }

    fn get(&mut self, path: &str, sink: &mut dyn Write) -> TransportResult<u64> {
        let mut file = self.sftp()?.open(Path::new(path)).map_err(sftp_error)?;
        Ok(io::copy(&mut file, sink)?)
    }

    fn put(&mut self, path: &str, source: &mut dyn Read) -> TransportResult<u64> {
        let mut file = self.sftp()?.create(Path::new(path)).map_err(sftp_error)?;
        let written = io::copy(source, &mut file)?;
        file.flush()?;
        Ok(written)
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> TransportResult<()> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        };
        self.sftp()?.setstat(Path::new(path), stat).map_err(sftp_error)
    }

    fn close(&mut self) -> TransportResult<()> {
        if self.sftp.take().is_some() {
            self.session
                .disconnect(None, "farpath session closed", None)
                .map_err(sftp_error)?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sftp"
    }
}
