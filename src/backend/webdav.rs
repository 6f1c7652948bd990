//! WebDAV transport
//!
//! Blocking HTTP through `reqwest`. `webdav://` maps to `http` and
//! `webdavs://` to `https`. Metadata comes from `PROPFIND`; the
//! multistatus body is scanned for the handful of live properties the
//! crate uses.

use chrono::DateTime;
use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::io::{self, Read, Write};
use std::time::{Duration, SystemTime};

use super::error::{TransportError, TransportResult};
use super::types::{RawEntry, RawKind, RawStat};
use super::{Connector, Transport};
use crate::config::FsConfig;
use crate::endpoint::{Credentials, EndpointKey, Scheme};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:resourcetype/>
    <D:getcontentlength/>
    <D:getlastmodified/>
    <D:creationdate/>
  </D:prop>
</D:propfind>"#;

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'`')
    .add(b'{')
    .add(b'}');

static RESPONSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z][\w.-]*:)?response\b[^>]*>(.*?)</(?:[A-Za-z][\w.-]*:)?response>")
        .expect("response pattern is valid")
});

static COLLECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:[A-Za-z][\w.-]*:)?collection\b").expect("collection pattern is valid")
});

static HREF_RE: Lazy<Regex> = Lazy::new(|| element("href"));
static LENGTH_RE: Lazy<Regex> = Lazy::new(|| element("getcontentlength"));
static MODIFIED_RE: Lazy<Regex> = Lazy::new(|| element("getlastmodified"));
static CREATED_RE: Lazy<Regex> = Lazy::new(|| element("creationdate"));

/// Pattern capturing the text of element `name` in any namespace prefix
fn element(name: &str) -> Regex {
    Regex::new(&format!(
        r"(?s)<(?:[A-Za-z][\w.-]*:)?{0}\b[^>]*>(.*?)</(?:[A-Za-z][\w.-]*:)?{0}>",
        name
    ))
    .expect("element pattern is valid")
}

fn property(body: &str, re: &Regex) -> Option<String> {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str().trim()))
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// One `<response>` of a multistatus body
#[derive(Debug, Clone, PartialEq)]
struct DavResource {
    /// Decoded href path, without a trailing slash
    path: String,
    stat: RawStat,
}

fn parse_multistatus(body: &str) -> Vec<DavResource> {
    RESPONSE_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let block = caps.get(1)?.as_str();
            let href = property(block, &HREF_RE)?;
            // Servers may answer with absolute URLs
            let href_path = match href.find("://") {
                Some(i) => href[i + 3..].find('/').map_or("/", |j| &href[i + 3 + j..]),
                None => href.as_str(),
            };
            let decoded = percent_decode_str(href_path).decode_utf8_lossy();
            let path = match decoded.trim_end_matches('/') {
                "" => "/".to_string(),
                p => p.to_string(),
            };

            let is_collection = COLLECTION_RE.is_match(block);
            let mut stat = if is_collection {
                RawStat::directory()
            } else {
                RawStat::file(
                    property(block, &LENGTH_RE)
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                )
            }
            .with_kind(RawKind::DirectoryFlag(is_collection));

            if let Some(modified) = property(block, &MODIFIED_RE)
                .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
            {
                stat = stat.with_modified(SystemTime::from(modified));
            }
            if let Some(created) = property(block, &CREATED_RE)
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            {
                stat = stat.with_created(SystemTime::from(created));
            }
            Some(DavResource { path, stat })
        })
        .collect()
}

fn status_error(response: &Response) -> TransportError {
    let status = response.status();
    TransportError::http(status.as_u16(), status.canonical_reason().unwrap_or("Unknown"))
}

fn request_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else if err.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else {
        io::ErrorKind::Other
    };
    TransportError::new(super::Status::Io(kind), err.to_string())
}

fn method(name: &str) -> TransportResult<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::new(super::Status::Io(io::ErrorKind::InvalidInput), e.to_string()))
}

/// Opens WebDAV sessions
#[derive(Debug, Default)]
pub struct WebDavConnector;

impl WebDavConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebDavConnector {
    fn connect(
        &self,
        key: &EndpointKey,
        credentials: &Credentials,
        config: &FsConfig,
    ) -> TransportResult<Box<dyn Transport>> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(request_error)?;
        let protocol = if key.scheme == Scheme::WebDavs { "https" } else { "http" };
        let base = format!("{}://{}:{}", protocol, key.host, key.port);

        let mut transport = WebDavTransport {
            client,
            base,
            user: (!key.principal.is_empty()).then(|| key.principal.clone()),
            password: credentials.password.clone(),
        };
        // Fail early on rejected credentials
        transport.propfind("/", 0).map_err(|e| match e.status {
            super::Status::Http { code: 401, .. } => TransportError::auth(e.message),
            _ => e,
        })?;
        tracing::debug!(base = %transport.base, "WebDAV endpoint reachable");
        Ok(Box::new(transport))
    }

    fn backend_name(&self) -> &'static str {
        "webdav"
    }
}

/// HTTP client bound to one server
pub struct WebDavTransport {
    client: Client,
    base: String,
    user: Option<String>,
    password: Option<SecretString>,
}

impl WebDavTransport {
    /// Absolute URL for a backend path; relative paths hang off the root
    fn url(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.base, encoded.join("/"))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.user {
            Some(user) => builder.basic_auth(
                user,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => builder,
        }
    }

    fn send(&self, builder: RequestBuilder) -> TransportResult<Response> {
        let response = builder.send().map_err(request_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(&response))
        }
    }

    fn propfind(&mut self, path: &str, depth: u8) -> TransportResult<Vec<DavResource>> {
        let builder = self
            .request(method("PROPFIND")?, path)
            .header("Depth", depth.to_string())
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        let response = self.send(builder)?;
        if response.status() != StatusCode::MULTI_STATUS {
            return Err(status_error(&response));
        }
        let body = response.text().map_err(request_error)?;
        Ok(parse_multistatus(&body))
    }

    fn normalized(path: &str) -> String {
        match path.trim_matches('/') {
            "" => "/".to_string(),
            p => format!("/{}", p),
        }
    }
}

impl Transport for WebDavTransport {
    fn stat(&mut self, path: &str) -> TransportResult<RawStat> {
        self.propfind(path, 0)?
            .into_iter()
            .next()
            .map(|r| r.stat)
            .ok_or_else(|| TransportError::http(404, "Not Found"))
    }

    fn list(&mut self, path: &str) -> TransportResult<Vec<RawEntry>> {
        let own = Self::normalized(path);
        let resources = self.propfind(path, 1)?;
        Ok(resources
            .into_iter()
            .filter(|r| r.path != own)
            .filter_map(|r| {
                let name = r.path.rsplit('/').next()?.to_string();
                (!name.is_empty()).then(|| RawEntry::new(name, r.stat))
            })
            .collect())
    }

    fn mkdir(&mut self, path: &str) -> TransportResult<()> {
        let builder = self.request(method("MKCOL")?, path);
        self.send(builder)?;
        Ok(())
    }

    fn remove(&mut self, path: &str, is_dir: bool) -> TransportResult<()> {
        // DELETE on a collection is recursive; keep rmdir semantics
        if is_dir && !self.list(path)?.is_empty() {
            return Err(TransportError::http(409, "Conflict"));
        }
        let builder = self.request(Method::DELETE, path);
        self.send(builder)?;
        Ok(())
    }

    fn get(&mut self, path: &str, sink: &mut dyn Write) -> TransportResult<u64> {
        let builder = self.request(Method::GET, path);
        let mut response = self.send(builder)?;
        Ok(io::copy(&mut response, sink)?)
    }

    fn put(&mut self, path: &str, source: &mut dyn Read) -> TransportResult<u64> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        let len = data.len() as u64;
        let builder = self.request(Method::PUT, path).body(data);
        self.send(builder)?;
        Ok(len)
    }

    fn native_copy(&mut self, from: &str, to: &str, overwrite: bool) -> TransportResult<()> {
        let builder = self
            .request(method("COPY")?, from)
            .header("Destination", self.url(to))
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .header("Depth", "0");
        self.send(builder)?;
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "webdav"
    }
}
