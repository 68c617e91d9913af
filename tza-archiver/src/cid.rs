//! IPFS content identifiers and archive targets
//!
//! A [`ContentId`] is the dedup key of the whole tool: the CID (plus optional
//! path and query) taken from a token's `artifactUri`. Generative tokens
//! share one CID and differ only in the query (`?fxhash=...`), so the query
//! is part of the identity. An [`ArchiveTarget`] is that CID
//! resolved to an HTTPS URL through the configured gateway.

use reqwest::Url;
use std::fmt;
use thiserror::Error;

const IPFS_SCHEME: &str = "ipfs://";
const GATEWAY_PATH_MARKER: &str = "/ipfs/";

/// CIDv0 is always a 46-character base58btc multihash starting with "Qm"
const CID_V0_LEN: usize = 46;
const CID_V0_PREFIX: &str = "Qm";
/// Shortest multibase CIDv1 accepted as plausible
const CID_V1_MIN_LEN: usize = 46;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE32_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz234567";

/// Identifier resolution errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Empty content identifier")]
    Empty,

    #[error("Not a valid CID: {0}")]
    InvalidCid(String),

    #[error("Invalid characters in path: {0}")]
    InvalidPath(String),

    #[error("Invalid gateway URL: {0}")]
    InvalidGateway(String),

    #[error("Could not build target URL: {0}")]
    InvalidUrl(String),
}

/// Opaque IPFS content identifier, optionally followed by a path and query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The CID proper, without any trailing path or query
    pub fn root(&self) -> &str {
        split_root(normalize(&self.0)).0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A content identifier resolved to a gateway URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    cid: ContentId,
    url: Url,
}

impl ArchiveTarget {
    pub fn cid(&self) -> &ContentId {
        &self.cid
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl fmt::Display for ArchiveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Extract a content identifier from a token's artifact URI
///
/// Accepted forms:
/// - `ipfs://<cid>[/path]`
/// - `ipfs://ipfs/<cid>[/path]`
/// - `http(s)://<gateway>/ipfs/<cid>[/path]`
///
/// Any of these may carry a query, which is kept as written. Fragments are
/// dropped. Anything else yields `None`.
pub fn extract_cid(artifact_uri: &str) -> Option<ContentId> {
    let uri = artifact_uri.trim();

    let rest = if let Some(rest) = uri.strip_prefix(IPFS_SCHEME) {
        rest.strip_prefix("ipfs/").unwrap_or(rest)
    } else if uri.starts_with("https://") || uri.starts_with("http://") {
        let index = uri.find(GATEWAY_PATH_MARKER)?;
        &uri[index + GATEWAY_PATH_MARKER.len()..]
    } else {
        return None;
    };

    let rest = rest.split('#').next().unwrap_or_default();
    let rest = trim_slashes(rest);
    if split_root(rest).0.is_empty() {
        None
    } else {
        Some(ContentId::new(rest))
    }
}

/// Leading slashes always; trailing ones only when there is no query
fn trim_slashes(value: &str) -> &str {
    let value = value.trim_start_matches('/');
    if value.contains('?') {
        value
    } else {
        value.trim_end_matches('/')
    }
}

/// Split `<cid><rest>` where `rest` is empty or starts with `/` or `?`
fn split_root(value: &str) -> (&str, &str) {
    match value.find(['/', '?']) {
        Some(index) => value.split_at(index),
        None => (value, ""),
    }
}

/// Strip a leading `ipfs://` (and `ipfs/`) left on stored identifiers
fn normalize(value: &str) -> &str {
    let value = value.trim();
    let value = value.strip_prefix(IPFS_SCHEME).unwrap_or(value);
    value.strip_prefix("ipfs/").unwrap_or(value)
}

fn in_alphabet(value: &str, alphabet: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| alphabet.contains(c))
}

/// Shape check only: no multihash decoding
pub fn is_plausible_cid(root: &str) -> bool {
    if root.starts_with(CID_V0_PREFIX) && root.len() == CID_V0_LEN {
        return in_alphabet(root, BASE58_ALPHABET);
    }

    if root.len() < CID_V1_MIN_LEN {
        return false;
    }

    if let Some(body) = root.strip_prefix('b') {
        in_alphabet(body, BASE32_ALPHABET)
    } else if let Some(body) = root.strip_prefix('z') {
        in_alphabet(body, BASE58_ALPHABET)
    } else {
        false
    }
}

/// Resolves content identifiers through a single IPFS gateway
#[derive(Debug, Clone)]
pub struct GatewayResolver {
    base: String,
}

impl GatewayResolver {
    pub fn new(gateway: &str) -> Result<Self, ResolveError> {
        let parsed =
            Url::parse(gateway.trim()).map_err(|e| ResolveError::InvalidGateway(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ResolveError::InvalidGateway(gateway.to_string()));
        }

        Ok(Self {
            base: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn gateway(&self) -> &str {
        &self.base
    }

    /// Resolve `<gateway>/<cid>[/path][?query]`
    pub fn resolve(&self, cid: &ContentId) -> Result<ArchiveTarget, ResolveError> {
        let normalized = trim_slashes(normalize(cid.as_str()));
        if normalized.is_empty() {
            return Err(ResolveError::Empty);
        }

        let (root, rest) = split_root(normalized);
        if !is_plausible_cid(root) {
            return Err(ResolveError::InvalidCid(root.to_string()));
        }

        if rest.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ResolveError::InvalidPath(rest.to_string()));
        }

        let url = Url::parse(&format!("{}/{}", self.base, normalized))
            .map_err(|e| ResolveError::InvalidUrl(e.to_string()))?;

        Ok(ArchiveTarget {
            cid: cid.clone(),
            url,
        })
    }
}
