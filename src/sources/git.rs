//! Git-hosted providers (GitHub, Bitbucket).
//!
//! Tags and branches are resolved to commits by listing the remote's refs,
//! the same information `git ls-remote` prints. The source is then fetched
//! as the host's tarball for that commit, so nothing is cloned.

use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;
use url::Url;

use crate::core::{PackageLocator, ProviderId, VersionToken};
use crate::sources::provider::{Provider, ProviderError};
use crate::util::http::TransportError;

/// A ref advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    /// Full ref name (`refs/tags/v1.0.0`, `refs/heads/main`, `HEAD`)
    pub name: String,
    /// Object id, hex
    pub oid: String,
}

/// Lists the refs of a remote repository.
pub trait RefLister: Send + Sync {
    fn list(&self, url: &str) -> Result<Vec<RemoteRef>, TransportError>;
}

/// [`RefLister`] backed by libgit2's remote listing.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitRefLister;

impl RefLister for GitRefLister {
    fn list(&self, url: &str) -> Result<Vec<RemoteRef>, TransportError> {
        let map_err = |e: git2::Error| match e.code() {
            // Hosts answer unknown repositories with an auth challenge.
            git2::ErrorCode::NotFound | git2::ErrorCode::Auth => TransportError::NotFound {
                url: url.to_string(),
            },
            _ => TransportError::Unavailable {
                url: url.to_string(),
                message: e.message().to_string(),
            },
        };

        let mut remote = git2::Remote::create_detached(url).map_err(map_err)?;
        remote
            .connect(git2::Direction::Fetch)
            .map_err(map_err)?;
        let refs = remote
            .list()
            .map_err(map_err)?
            .iter()
            .map(|head| RemoteRef {
                name: head.name().to_string(),
                oid: head.oid().to_string(),
            })
            .collect();
        if let Err(e) = remote.disconnect() {
            tracing::debug!("failed to disconnect from {}: {}", url, e);
        }
        Ok(refs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Host {
    GitHub,
    Bitbucket,
}

/// Provider for a repository on GitHub or Bitbucket.
pub struct GitProvider {
    host: Host,
    owner: String,
    repo: String,
    refs: Arc<dyn RefLister>,
}

/// What a literal token matched.
#[derive(Debug, PartialEq, Eq)]
enum Matched {
    Tag(String),
    Branch(String),
    Commit,
}

/// Remote refs split by kind. Annotated tags use their peeled commit.
#[derive(Debug, Default)]
struct RefTable {
    tags: BTreeMap<String, String>,
    branches: BTreeMap<String, String>,
    head: Option<String>,
}

impl RefTable {
    fn new(refs: Vec<RemoteRef>) -> Self {
        let mut table = RefTable::default();
        let mut peeled = BTreeMap::new();

        for r in refs {
            if let Some(tag) = r.name.strip_prefix("refs/tags/") {
                match tag.strip_suffix("^{}") {
                    Some(tag) => {
                        peeled.insert(tag.to_string(), r.oid);
                    }
                    None => {
                        table.tags.insert(tag.to_string(), r.oid);
                    }
                }
            } else if let Some(branch) = r.name.strip_prefix("refs/heads/") {
                table.branches.insert(branch.to_string(), r.oid);
            } else if r.name == "HEAD" {
                table.head = Some(r.oid);
            }
        }
        table.tags.extend(peeled);
        table
    }

    /// Highest semver tag, optionally including pre-releases.
    fn highest_tag(&self, allow_pre: bool) -> Option<(&str, &str, Version)> {
        self.tags
            .iter()
            .filter_map(|(tag, oid)| {
                let version = Version::parse(tag.trim_start_matches(['v', 'V'])).ok()?;
                (allow_pre || version.pre.is_empty()).then_some((tag.as_str(), oid.as_str(), version))
            })
            .max_by(|a, b| a.2.cmp(&b.2))
    }

    fn find_literal(&self, literal: &str) -> Option<(Matched, String)> {
        let tag_candidates = [literal.to_string(), format!("v{}", literal)];
        for tag in &tag_candidates {
            if let Some(oid) = self.tags.get(tag) {
                return Some((Matched::Tag(tag.clone()), oid.clone()));
            }
        }
        if let Some(oid) = self.branches.get(literal) {
            return Some((Matched::Branch(literal.to_string()), oid.clone()));
        }
        if matches!(literal, "HEAD" | "master" | "main") {
            if let Some(oid) = &self.head {
                let branch = self
                    .branches
                    .iter()
                    .find(|(_, b)| *b == oid)
                    .map(|(name, _)| name.clone())
                    .unwrap_or_else(|| "HEAD".to_string());
                return Some((Matched::Branch(branch), oid.clone()));
            }
        }
        if is_full_commit(literal) {
            return Some((Matched::Commit, literal.to_ascii_lowercase()));
        }
        None
    }
}

fn is_full_commit(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn short(oid: &str) -> &str {
    &oid[..oid.len().min(7)]
}

impl GitProvider {
    pub fn github(owner: &str, repo: &str, refs: Arc<dyn RefLister>) -> Self {
        GitProvider {
            host: Host::GitHub,
            owner: owner.to_string(),
            repo: repo.to_string(),
            refs,
        }
    }

    pub fn bitbucket(owner: &str, repo: &str, refs: Arc<dyn RefLister>) -> Self {
        GitProvider {
            host: Host::Bitbucket,
            owner: owner.to_string(),
            repo: repo.to_string(),
            refs,
        }
    }

    fn base(&self) -> &'static str {
        match self.host {
            Host::GitHub => "https://github.com",
            Host::Bitbucket => "https://bitbucket.org",
        }
    }

    pub fn clone_url(&self) -> String {
        format!("{}/{}/{}.git", self.base(), self.owner, self.repo)
    }

    /// Host tarball URL for a commit.
    pub fn archive_url(&self, commit: &str) -> Result<Url, ProviderError> {
        let raw = match self.host {
            Host::GitHub => format!(
                "{}/{}/{}/archive/{}.tar.gz",
                self.base(),
                self.owner,
                self.repo,
                commit
            ),
            Host::Bitbucket => format!(
                "{}/{}/{}/get/{}.tar.gz",
                self.base(),
                self.owner,
                self.repo,
                commit
            ),
        };
        Url::parse(&raw).map_err(|e| ProviderError::Invalid {
            provider: self.id(),
            message: format!("bad archive URL `{}`: {}", raw, e),
        })
    }

    fn not_found(&self, package: &str, token: &VersionToken) -> ProviderError {
        ProviderError::NotFound {
            provider: self.id(),
            package: package.to_string(),
            version: token.to_string(),
        }
    }
}

impl Provider for GitProvider {
    fn id(&self) -> ProviderId {
        match self.host {
            Host::GitHub => ProviderId::GitHub {
                owner: self.owner.clone(),
                repo: self.repo.clone(),
            },
            Host::Bitbucket => ProviderId::Bitbucket {
                owner: self.owner.clone(),
                repo: self.repo.clone(),
            },
        }
    }

    fn resolve(
        &self,
        package: &str,
        token: &VersionToken,
    ) -> Result<PackageLocator, ProviderError> {
        let url = self.clone_url();
        tracing::debug!("listing refs of {}", url);
        let refs = self
            .refs
            .list(&url)
            .map_err(|e| ProviderError::from_transport(&self.id(), package, &token.to_string(), e))?;
        let table = RefTable::new(refs);

        let (version, commit) = match token {
            VersionToken::Literal(literal) => {
                let (matched, oid) = table
                    .find_literal(literal)
                    .ok_or_else(|| self.not_found(package, token))?;
                let version = match matched {
                    Matched::Tag(tag) => tag.trim_start_matches(['v', 'V']).to_string(),
                    // Moving refs get a new cache key whenever they move.
                    Matched::Branch(branch) => {
                        format!("{}-{}", branch.replace('/', "-"), short(&oid))
                    }
                    Matched::Commit => short(&oid).to_string(),
                };
                (version, oid)
            }
            symbolic => {
                let allow_pre = !matches!(symbolic, VersionToken::Stable);
                let (tag, oid, _) = table
                    .highest_tag(allow_pre)
                    .ok_or_else(|| self.not_found(package, token))?;
                (tag.trim_start_matches(['v', 'V']).to_string(), oid.to_string())
            }
        };

        let url = self.archive_url(&commit)?;
        Ok(PackageLocator::archive(self.id(), package, version, url))
    }
}
