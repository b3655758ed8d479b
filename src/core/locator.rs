//! Resolved download targets.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

/// Identity of the provider that produced a locator.
///
/// Rendered forms (`pecl`, `github:krakjoe/apcu`, `local`) are stable: they
/// are written to manifests and used as the first level of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ProviderId {
    Pecl,
    GitHub { owner: String, repo: String },
    Bitbucket { owner: String, repo: String },
    Local,
}

impl ProviderId {
    /// Short kind name without the repository part.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderId::Pecl => "pecl",
            ProviderId::GitHub { .. } => "github",
            ProviderId::Bitbucket { .. } => "bitbucket",
            ProviderId::Local => "local",
        }
    }

    /// Directory-safe rendering for cache paths.
    pub fn cache_segment(&self) -> String {
        match self {
            ProviderId::GitHub { owner, repo } | ProviderId::Bitbucket { owner, repo } => {
                format!("{}-{}-{}", self.kind(), owner, repo)
            }
            _ => self.kind().to_string(),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::GitHub { owner, repo } | ProviderId::Bitbucket { owner, repo } => {
                write!(f, "{}:{}/{}", self.kind(), owner, repo)
            }
            _ => write!(f, "{}", self.kind()),
        }
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ProviderId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (kind, rest) = s.split_once(':').unwrap_or((s.as_str(), ""));
        let repo = || {
            rest.split_once('/')
                .filter(|(o, r)| !o.is_empty() && !r.is_empty())
                .map(|(o, r)| (o.to_string(), r.to_string()))
                .ok_or_else(|| format!("invalid provider id `{}`", s))
        };
        match kind {
            "pecl" => Ok(ProviderId::Pecl),
            "local" => Ok(ProviderId::Local),
            "github" => repo().map(|(owner, repo)| ProviderId::GitHub { owner, repo }),
            "bitbucket" => repo().map(|(owner, repo)| ProviderId::Bitbucket { owner, repo }),
            _ => Err(format!("invalid provider id `{}`", s)),
        }
    }
}

/// An expected digest for a downloaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    /// Lowercase hex SHA256
    pub sha256: String,
}

impl Checksum {
    pub fn sha256(hex: impl Into<String>) -> Self {
        Checksum {
            sha256: hex.into().trim().to_ascii_lowercase(),
        }
    }

    pub fn matches(&self, actual_hex: &str) -> bool {
        self.sha256.eq_ignore_ascii_case(actual_hex)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.sha256)
    }
}

/// Where the package bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorSource {
    /// An archive reachable through the transport (`https://`, `file://`).
    Archive { url: Url, file_name: String },
    /// An unpacked source tree on local disk; nothing to fetch or cache.
    Directory(PathBuf),
}

/// A resolved download target, produced by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLocator {
    pub provider: ProviderId,
    /// Package name as the upstream spells it (`APCu`)
    pub package: String,
    /// Concrete version the token resolved to
    pub version: String,
    pub source: LocatorSource,
    pub checksum: Option<Checksum>,
}

impl PackageLocator {
    /// Locator for a remote archive.
    pub fn archive(
        provider: ProviderId,
        package: impl Into<String>,
        version: impl Into<String>,
        url: Url,
    ) -> Self {
        let file_name = archive_file_name(&url);
        PackageLocator {
            provider,
            package: package.into(),
            version: version.into(),
            source: LocatorSource::Archive { url, file_name },
            checksum: None,
        }
    }

    /// Locator for an unpacked source tree.
    pub fn directory(
        provider: ProviderId,
        package: impl Into<String>,
        version: impl Into<String>,
        path: PathBuf,
    ) -> Self {
        PackageLocator {
            provider,
            package: package.into(),
            version: version.into(),
            source: LocatorSource::Directory(path),
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn url(&self) -> Option<&Url> {
        match &self.source {
            LocatorSource::Archive { url, .. } => Some(url),
            LocatorSource::Directory(_) => None,
        }
    }

    /// Human-readable origin for log lines.
    pub fn origin(&self) -> String {
        match &self.source {
            LocatorSource::Archive { url, .. } => url.to_string(),
            LocatorSource::Directory(path) => path.display().to_string(),
        }
    }
}

fn archive_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "package.tar.gz".to_string())
}
