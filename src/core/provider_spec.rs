//! Provider selection as written by users and recipes.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Which provider to use for a package, and how to reach it.
///
/// Written as `pecl`, `pecl:APCu`, `github:owner/repo`,
/// `bitbucket:owner/repo`, `local:/path/to/src`, or a GitHub/Bitbucket URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderSpec {
    /// PECL, optionally under a different upstream package name.
    Pecl { package: Option<String> },
    GitHub { owner: String, repo: String },
    Bitbucket { owner: String, repo: String },
    /// A source directory or archive on local disk.
    Local { path: PathBuf },
}

impl ProviderSpec {
    pub fn pecl() -> Self {
        ProviderSpec::Pecl { package: None }
    }

    pub fn github(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        ProviderSpec::GitHub {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        ProviderSpec::Local { path: path.into() }
    }

    /// Upstream package name for `extension`, honoring PECL renames.
    pub fn package_name<'a>(&'a self, extension: &'a str) -> &'a str {
        match self {
            ProviderSpec::Pecl {
                package: Some(package),
            } => package,
            ProviderSpec::GitHub { repo, .. } | ProviderSpec::Bitbucket { repo, .. } => repo,
            _ => extension,
        }
    }
}

impl Default for ProviderSpec {
    fn default() -> Self {
        ProviderSpec::pecl()
    }
}

fn owner_repo(s: &str) -> Option<(String, String)> {
    let s = s.trim_end_matches('/').trim_end_matches(".git");
    let (owner, repo) = s.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

impl FromStr for ProviderSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || format!("invalid provider `{}`", s);

        if let Ok(url) = Url::parse(s) {
            let path = url.path().trim_start_matches('/');
            match url.host_str() {
                Some("github.com") => {
                    let (owner, repo) = owner_repo(path).ok_or_else(invalid)?;
                    return Ok(ProviderSpec::GitHub { owner, repo });
                }
                Some("bitbucket.org") => {
                    let (owner, repo) = owner_repo(path).ok_or_else(invalid)?;
                    return Ok(ProviderSpec::Bitbucket { owner, repo });
                }
                _ if url.scheme() == "file" => {
                    let path = url.to_file_path().map_err(|_| invalid())?;
                    return Ok(ProviderSpec::Local { path });
                }
                _ => {}
            }
        }

        let (kind, rest) = s.split_once(':').unwrap_or((s, ""));
        match kind.to_ascii_lowercase().as_str() {
            "pecl" => Ok(ProviderSpec::Pecl {
                package: (!rest.is_empty()).then(|| rest.to_string()),
            }),
            "github" | "gh" => {
                let (owner, repo) = owner_repo(rest).ok_or_else(invalid)?;
                Ok(ProviderSpec::GitHub { owner, repo })
            }
            "bitbucket" | "bb" => {
                let (owner, repo) = owner_repo(rest).ok_or_else(invalid)?;
                Ok(ProviderSpec::Bitbucket { owner, repo })
            }
            "local" | "path" if !rest.is_empty() => Ok(ProviderSpec::Local {
                path: PathBuf::from(rest),
            }),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ProviderSpec {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProviderSpec> for String {
    fn from(spec: ProviderSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderSpec::Pecl { package: None } => write!(f, "pecl"),
            ProviderSpec::Pecl {
                package: Some(package),
            } => write!(f, "pecl:{}", package),
            ProviderSpec::GitHub { owner, repo } => write!(f, "github:{}/{}", owner, repo),
            ProviderSpec::Bitbucket { owner, repo } => write!(f, "bitbucket:{}/{}", owner, repo),
            ProviderSpec::Local { path } => write!(f, "local:{}", path.display()),
        }
    }
}
