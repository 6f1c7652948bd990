//! Immutable virtual paths scoped to one endpoint
//!
//! A [`RemotePath`] is an ordered list of segments plus an absolute flag
//! and the identity of the endpoint it belongs to. No operation here
//! performs I/O.
//!
//! Segment text is kept verbatim: percent-encoding happens only when a
//! path is rendered as a URI (see [`RemotePath::to_uri`]).
//!
//! A path parsed from text that ends with a separator keeps an empty last
//! segment as a directory marker; [`RemotePath::normalize`] drops it and
//! the algebra ignores it when comparing prefixes.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::endpoint::EndpointRef;
use crate::error::{FsError, Result};

const CURRENT_DIR: &str = ".";
const PARENT_DIR: &str = "..";

/// Immutable backend-scoped path
#[derive(Debug, Clone)]
pub struct RemotePath {
    endpoint: EndpointRef,
    absolute: bool,
    segments: Vec<String>,
    /// Absolute prefix factored out by `relativize`; ignored by equality
    anchor: Option<Arc<RemotePath>>,
}

impl RemotePath {
    /// The absolute root of `endpoint`
    pub fn root(endpoint: &EndpointRef) -> Self {
        Self {
            endpoint: endpoint.clone(),
            absolute: true,
            segments: Vec::new(),
            anchor: None,
        }
    }

    /// Parse `raw` using the separator of the endpoint's scheme
    ///
    /// `/` is accepted by every scheme. A leading separator makes the path
    /// absolute. Repeated separators collapse. A trailing separator is kept
    /// as a directory marker. For schemes with a home marker (`~` on SFTP)
    /// a leading marker segment is stripped and the result is relative to
    /// the login directory.
    pub fn parse(endpoint: &EndpointRef, raw: &str) -> Result<Self> {
        if raw.contains('\0') {
            return Err(FsError::invalid_path(
                raw.escape_default().to_string(),
                "path contains a NUL character",
            ));
        }

        let scheme = endpoint.scheme();
        let separator = scheme.separator();
        let is_separator = |c: char| c == '/' || c == separator;

        let mut absolute = raw.starts_with(is_separator);
        let mut segments: Vec<String> = raw
            .split(is_separator)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(marker) = scheme.home_marker() {
            if segments.first().map(String::as_str) == Some(marker) {
                segments.remove(0);
                absolute = false;
            }
        }

        if raw.ends_with(is_separator) && !segments.is_empty() {
            segments.push(String::new());
        }

        Ok(Self {
            endpoint: endpoint.clone(),
            absolute,
            segments,
            anchor: None,
        })
    }

    pub fn endpoint(&self) -> &EndpointRef {
        &self.endpoint
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Raw segments, including a trailing directory marker if present
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True if the path was written with a trailing separator
    pub fn is_directory_hint(&self) -> bool {
        self.segments.last().is_some_and(|s| s.is_empty())
    }

    /// Anchor captured by `relativize`, if any
    pub fn anchor(&self) -> Option<&RemotePath> {
        self.anchor.as_deref()
    }

    /// Segments without the directory marker
    fn names(&self) -> &[String] {
        if self.is_directory_hint() {
            &self.segments[..self.segments.len() - 1]
        } else {
            &self.segments
        }
    }

    /// Number of name elements
    pub fn name_count(&self) -> usize {
        self.names().len()
    }

    /// Iterate over the name elements
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names().iter().map(String::as_str)
    }

    /// Derive a path on the same endpoint. Relative results keep the anchor
    /// so they can still be made absolute.
    fn derive(&self, absolute: bool, segments: Vec<String>) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            absolute,
            segments,
            anchor: if absolute { None } else { self.anchor.clone() },
        }
    }

    fn detached(&self, segments: Vec<String>) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            absolute: false,
            segments,
            anchor: None,
        }
    }

    fn check_same_endpoint(&self, other: &RemotePath) -> Result<()> {
        if self.endpoint != other.endpoint {
            return Err(FsError::InvalidArgument(format!(
                "paths belong to different endpoints: {} and {}",
                self.endpoint, other.endpoint
            )));
        }
        Ok(())
    }

    fn check_same_kind(&self, other: &RemotePath) -> Result<()> {
        self.check_same_endpoint(other)?;
        if self.absolute != other.absolute {
            return Err(FsError::InvalidArgument(format!(
                "cannot mix absolute and relative paths: '{}' and '{}'",
                self, other
            )));
        }
        Ok(())
    }

    /// Root of an absolute path
    pub fn root_of(&self) -> Option<RemotePath> {
        self.absolute.then(|| RemotePath::root(&self.endpoint))
    }

    /// Last name element as a single-segment relative path
    pub fn file_name(&self) -> Option<RemotePath> {
        self.names().last().map(|name| self.detached(vec![name.clone()]))
    }

    /// Path without its last name element
    pub fn parent(&self) -> Option<RemotePath> {
        let names = self.names();
        match names.len() {
            0 => None,
            1 if self.absolute => Some(RemotePath::root(&self.endpoint)),
            1 => None,
            n => Some(self.derive(self.absolute, names[..n - 1].to_vec())),
        }
    }

    /// Name element at `index` as a relative path
    pub fn name(&self, index: usize) -> Result<RemotePath> {
        self.names()
            .get(index)
            .map(|name| self.detached(vec![name.clone()]))
            .ok_or_else(|| {
                FsError::InvalidArgument(format!(
                    "name index {} out of range for '{}'",
                    index, self
                ))
            })
    }

    /// Relative path made of name elements `begin..end`
    pub fn subpath(&self, begin: usize, end: usize) -> Result<RemotePath> {
        let names = self.names();
        if begin >= end || end > names.len() {
            return Err(FsError::InvalidArgument(format!(
                "invalid subpath range {}..{} for '{}'",
                begin, end, self
            )));
        }
        Ok(self.detached(names[begin..end].to_vec()))
    }

    /// Remove `.` segments and collapse `name/..` pairs
    ///
    /// Fails with `InvalidPath` when an absolute path climbs above its
    /// root. On a relative path, `..` segments that cannot be collapsed
    /// are kept at the front.
    pub fn normalize(&self) -> Result<RemotePath> {
        let mut out: Vec<String> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment.as_str() {
                "" | CURRENT_DIR => {}
                PARENT_DIR => match out.last() {
                    Some(last) if last != PARENT_DIR => {
                        out.pop();
                    }
                    _ if self.absolute => {
                        return Err(FsError::invalid_path(
                            self.to_string(),
                            "normalization climbs above the root",
                        ));
                    }
                    _ => out.push(PARENT_DIR.to_string()),
                },
                _ => out.push(segment.clone()),
            }
        }
        Ok(self.derive(self.absolute, out))
    }

    /// Join `other` onto this path
    ///
    /// An absolute `other` is returned as is; an empty `other` returns
    /// `self`. Otherwise the segments are concatenated and the result is
    /// absolute iff `self` is.
    pub fn resolve(&self, other: &RemotePath) -> Result<RemotePath> {
        self.check_same_endpoint(other)?;
        if other.absolute {
            return Ok(other.clone());
        }
        if other.segments.is_empty() {
            return Ok(self.clone());
        }
        let mut segments = self.names().to_vec();
        segments.extend(other.segments.iter().cloned());
        Ok(self.derive(self.absolute, segments))
    }

    /// Parse `raw` on this path's endpoint and resolve it
    pub fn resolve_str(&self, raw: &str) -> Result<RemotePath> {
        self.resolve(&RemotePath::parse(&self.endpoint, raw)?)
    }

    /// Append one name verbatim
    ///
    /// Unlike `resolve_str`, the name is not parsed: a `~` or `..` returned
    /// by a directory listing stays an ordinary name.
    pub fn child(&self, name: &str) -> Result<RemotePath> {
        let separator = self.endpoint.scheme().separator();
        if name.is_empty() || name.contains(['/', separator, '\0']) {
            return Err(FsError::invalid_path(
                name.escape_default().to_string(),
                "not a single path segment",
            ));
        }
        let mut segments = self.names().to_vec();
        segments.push(name.to_string());
        Ok(self.derive(self.absolute, segments))
    }

    /// Relative path that leads from `self` to `other`
    ///
    /// Both paths must be on the same endpoint, share the absolute flag,
    /// and `self` must be a segment-wise prefix of `other`. The result
    /// carries `self` as its anchor and keeps `other`'s directory marker.
    pub fn relativize(&self, other: &RemotePath) -> Result<RemotePath> {
        self.check_same_kind(other)?;
        let base = self.names();
        let target = other.names();
        if target.len() < base.len() || target[..base.len()] != *base {
            return Err(FsError::InvalidArgument(format!(
                "'{}' is not located under '{}'",
                other, self
            )));
        }
        Ok(Self {
            endpoint: self.endpoint.clone(),
            absolute: false,
            segments: other.segments[base.len()..].to_vec(),
            anchor: Some(Arc::new(self.clone())),
        })
    }

    /// Absolute form of this path
    ///
    /// Relative paths are resolved against the anchor captured by
    /// `relativize`, or against the endpoint root when there is none.
    pub fn to_absolute_path(&self) -> RemotePath {
        if self.absolute {
            return self.clone();
        }
        let base = match &self.anchor {
            Some(anchor) => anchor.to_absolute_path(),
            None => RemotePath::root(&self.endpoint),
        };
        let mut segments = base.names().to_vec();
        segments.extend(self.segments.iter().cloned());
        self.derive(true, segments)
    }

    /// Segment-wise prefix test; false across endpoints or absoluteness
    pub fn starts_with(&self, other: &RemotePath) -> bool {
        if self.endpoint != other.endpoint || self.absolute != other.absolute {
            return false;
        }
        let (names, prefix) = (self.names(), other.names());
        prefix.len() <= names.len() && names[..prefix.len()] == *prefix
    }

    /// Segment-wise suffix test
    ///
    /// An absolute `other` only matches a path equal to it. A relative
    /// `other` matches the trailing names of either kind of path.
    pub fn ends_with(&self, other: &RemotePath) -> bool {
        if self.endpoint != other.endpoint {
            return false;
        }
        let (names, suffix) = (self.names(), other.names());
        if other.absolute {
            return self.absolute && names == suffix;
        }
        if suffix.is_empty() {
            return names.is_empty() && !self.absolute;
        }
        suffix.len() <= names.len() && names[names.len() - suffix.len()..] == *suffix
    }

    /// Shorter paths first, then the first differing segment (ordinal)
    ///
    /// Paths on different endpoints or with different absolute flags are
    /// not comparable. The directory marker counts as a trailing empty
    /// segment, so `/a/` sorts after `/a`, matching equality.
    pub fn compare_to(&self, other: &RemotePath) -> Result<Ordering> {
        self.check_same_kind(other)?;
        Ok(compare_segments(&self.segments, &other.segments))
    }

    /// Render with the backend's own separator
    pub fn to_backend_string(&self) -> String {
        self.render(self.endpoint.scheme().separator())
    }

    /// Percent-encoded URI of the absolute form of this path
    pub fn to_uri(&self) -> String {
        crate::uri::render_uri(self)
    }

    fn render(&self, separator: char) -> String {
        let mut out = String::new();
        if self.absolute {
            out.push(separator);
        }
        let mut sep = [0u8; 4];
        out.push_str(&self.segments.join(separator.encode_utf8(&mut sep)));
        out
    }
}

fn compare_segments(a: &[String], b: &[String]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render('/'))
    }
}

impl PartialEq for RemotePath {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
            && self.absolute == other.absolute
            && self.segments == other.segments
    }
}

impl Eq for RemotePath {}

impl Hash for RemotePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
        self.absolute.hash(state);
        self.segments.hash(state);
    }
}

/// Total order for sorted collections: absoluteness, then
/// [`RemotePath::compare_to`] order, then endpoint identity
impl Ord for RemotePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.absolute
            .cmp(&other.absolute)
            .then_with(|| compare_segments(&self.segments, &other.segments))
            .then_with(|| self.endpoint.id().cmp(&other.endpoint.id()))
    }
}

impl PartialOrd for RemotePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
