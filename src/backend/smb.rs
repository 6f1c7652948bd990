//! SMB2/3 transport
//!
//! Built on the pure-Rust `smb` client. The client is async; every
//! [`SmbTransport`] owns a current-thread runtime and blocks on it, so the
//! transport stays synchronous like the others.
//!
//! Backend paths look like `\share\dir\file`: the first segment names the
//! share, which is connected on first use.

use secrecy::ExposeSecret;
use smb::{Client, ClientConfig, FileAccessMask, FileCreateArgs, Resource, UncPath};
use std::collections::HashSet;
use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::str::FromStr;
use tokio::runtime::Runtime;

use super::error::{nt_status, Status, TransportError, TransportResult};
use super::types::{RawEntry, RawKind, RawStat};
use super::{Connector, Transport};
use crate::config::FsConfig;
use crate::endpoint::{Credentials, EndpointKey};

const CHUNK_LEN: usize = 1 << 20;

/// Recover the NTSTATUS a server answered with
///
/// Errors raised on the client side carry no status and report
/// `STATUS_UNSUCCESSFUL`.
fn smb_error(err: smb::Error) -> TransportError {
    let code = match &err {
        smb::Error::ReceivedErrorMessage(code, _) | smb::Error::UnexpectedMessageStatus(code) => {
            *code
        }
        _ => nt_status::UNSUCCESSFUL,
    };
    TransportError::smb(code, err.to_string())
}

/// A path the client refused to turn into a UNC name
fn invalid_unc(path: &str, err: impl Debug) -> TransportError {
    TransportError::smb(
        nt_status::OBJECT_NAME_INVALID,
        format!("invalid UNC path {}: {:?}", path, err),
    )
}

/// Split `\share\rest` into the share name and the path inside it
fn split_share(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_start_matches('\\');
    if trimmed.is_empty() {
        return None;
    }
    Some(match trimmed.split_once('\\') {
        Some((share, rest)) => (share, rest.trim_end_matches('\\')),
        None => (trimmed, ""),
    })
}

/// Opens SMB sessions
#[derive(Debug, Default)]
pub struct SmbConnector;

impl SmbConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SmbConnector {
    fn connect(
        &self,
        key: &EndpointKey,
        credentials: &Credentials,
        _config: &FsConfig,
    ) -> TransportResult<Box<dyn Transport>> {
        if key.port != key.scheme.default_port() {
            tracing::warn!(port = key.port, "SMB client always dials the default port");
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let username = match &credentials.domain {
            Some(domain) => format!("{}\\{}", domain, key.principal),
            None => key.principal.clone(),
        };
        let password = credentials
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
            .unwrap_or_default();

        tracing::debug!(host = %key.host, "SMB transport created");
        Ok(Box::new(SmbTransport {
            runtime,
            client: Client::new(ClientConfig::default()),
            host: key.host.clone(),
            username,
            password,
            shares: HashSet::new(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "smb"
    }
}

/// One SMB client with the shares it has connected
pub struct SmbTransport {
    runtime: Runtime,
    client: Client,
    host: String,
    username: String,
    password: String,
    shares: HashSet<String>,
}

impl SmbTransport {
    /// UNC path for `path`, connecting its share first
    fn unc(&mut self, path: &str) -> TransportResult<UncPath> {
        let (share, rest) = split_share(path)
            .ok_or_else(|| TransportError::unsupported("operations on the share list"))?;

        if !self.shares.contains(share) {
            let share_unc = format!(r"\\{}\{}", self.host, share);
            let unc = UncPath::from_str(&share_unc).map_err(|e| invalid_unc(&share_unc, e))?;
            let (client, username, password) = (&self.client, &self.username, &self.password);
            self.runtime
                .block_on(client.share_connect(&unc, username, password.clone()))
                .map_err(|e| {
                    let err = smb_error(e);
                    if err.status == Status::Smb(nt_status::LOGON_FAILURE) {
                        TransportError::auth(err.message)
                    } else {
                        err
                    }
                })?;
            tracing::debug!(host = %self.host, share, "SMB share connected");
            self.shares.insert(share.to_string());
        }

        let full = if rest.is_empty() {
            format!(r"\\{}\{}", self.host, share)
        } else {
            format!(r"\\{}\{}\{}", self.host, share, rest)
        };
        UncPath::from_str(&full).map_err(|e| invalid_unc(&full, e))
    }

    fn open(&mut self, path: &str, args: FileCreateArgs) -> TransportResult<Resource> {
        let unc = self.unc(path)?;
        self.runtime
            .block_on(self.client.create_file(&unc, &args))
            .map_err(smb_error)
    }

    fn close_resource(&self, resource: Resource) -> TransportResult<()> {
        self.runtime.block_on(async {
            match resource {
                Resource::File(f) => f.close().await.map_err(smb_error),
                Resource::Directory(d) => d.close().await.map_err(smb_error),
                Resource::Pipe(p) => p.close().await.map_err(smb_error),
            }
        })
    }

    fn stat_resource(&self, resource: &Resource) -> TransportResult<RawStat> {
        match resource {
            Resource::File(f) => {
                let len = self.runtime.block_on(f.get_len()).map_err(smb_error)?;
                Ok(RawStat::file(len).with_kind(RawKind::DirectoryFlag(false)))
            }
            Resource::Directory(_) => Ok(RawStat::directory().with_kind(RawKind::DirectoryFlag(true))),
            Resource::Pipe(_) => Ok(RawStat::file(0).with_kind(RawKind::Other)),
        }
    }
}

impl Transport for SmbTransport {
    fn stat(&mut self, path: &str) -> TransportResult<RawStat> {
        if split_share(path).is_none() {
            return Ok(RawStat::directory().with_kind(RawKind::DirectoryFlag(true)));
        }
        let resource = self.open(
            path,
            FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true)),
        )?;
        let stat = self.stat_resource(&resource);
        self.close_resource(resource)?;
        stat
    }

    fn list(&mut self, path: &str) -> TransportResult<Vec<RawEntry>> {
        let resource = self.open(
            path,
            FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true)),
        )?;
        let dir = match resource {
            Resource::Directory(d) => d,
            other => {
                self.close_resource(other)?;
                return Err(TransportError::smb(nt_status::NOT_A_DIRECTORY, "STATUS_NOT_A_DIRECTORY"));
            }
        };
        let listed = self.runtime.block_on(dir.list()).map_err(smb_error);
        self.close_resource(Resource::Directory(dir))?;

        let base = path.trim_end_matches('\\');
        let mut entries = Vec::new();
        for entry in listed? {
            let name = entry.file_name.to_string();
            if name == "." || name == ".." {
                continue;
            }
            let stat = self.stat(&format!("{}\\{}", base, name))?;
            entries.push(RawEntry::new(name, stat));
        }
        Ok(entries)
    }

    fn mkdir(&mut self, path: &str) -> TransportResult<()> {
        let resource = self.open(path, FileCreateArgs::make_create_directory())?;
        self.close_resource(resource)
    }

    fn remove(&mut self, path: &str, _is_dir: bool) -> TransportResult<()> {
        let mut args = FileCreateArgs::make_open_existing(FileAccessMask::new().with_delete(true));
        args.options = args.options.with_delete_on_close(true);
        let resource = self.open(path, args)?;
        // The server applies the delete, or reports a non-empty directory,
        // when the handle closes
        self.close_resource(resource)
    }

    fn get(&mut self, path: &str, sink: &mut dyn Write) -> TransportResult<u64> {
        let resource = self.open(
            path,
            FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true)),
        )?;
        let file = match resource {
            Resource::File(f) => f,
            other => {
                self.close_resource(other)?;
                return Err(TransportError::smb(
                    nt_status::FILE_IS_A_DIRECTORY,
                    "STATUS_FILE_IS_A_DIRECTORY",
                ));
            }
        };

        let copied = self.runtime.block_on(async {
            let mut offset = 0u64;
            let mut chunk = vec![0u8; CHUNK_LEN];
            loop {
                let read = file.read_at(&mut chunk, offset).await.map_err(smb_error)?;
                if read == 0 {
                    break;
                }
                sink.write_all(&chunk[..read])?;
                offset += read as u64;
            }
            Ok::<_, TransportError>(offset)
        });
        self.close_resource(Resource::File(file))?;
        copied
    }

    fn put(&mut self, path: &str, source: &mut dyn Read) -> TransportResult<u64> {
        let resource = self.open(
            path,
            FileCreateArgs::make_create_always(FileAccessMask::new().with_generic_write(true)),
        )?;
        let file = match resource {
            Resource::File(f) => f,
            other => {
                self.close_resource(other)?;
                return Err(TransportError::smb(
                    nt_status::FILE_IS_A_DIRECTORY,
                    "STATUS_FILE_IS_A_DIRECTORY",
                ));
            }
        };

        let written = self.runtime.block_on(async {
            let mut offset = 0u64;
            let mut chunk = vec![0u8; CHUNK_LEN];
            loop {
                let read = match source.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                };
                file.write_at(&chunk[..read], offset).await.map_err(smb_error)?;
                offset += read as u64;
            }
            Ok::<_, TransportError>(offset)
        });
        self.close_resource(Resource::File(file))?;
        written
    }

    fn close(&mut self) -> TransportResult<()> {
        // Dropping the client tears the connections down
        self.shares.clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "smb"
    }
}
