//! Provider trait - common interface for all extension package sources.

use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::core::{PackageLocator, ProviderId, ProviderSpec, VersionToken};
use crate::sources::git::{GitProvider, GitRefLister, RefLister};
use crate::sources::local::LocalProvider;
use crate::sources::pecl::PeclProvider;
use crate::util::config::DEFAULT_PECL_URL;
use crate::util::http::{Transport, TransportError};

/// Why a provider could not resolve a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The package or version does not exist upstream.
    #[error("{package} {version} not found on {provider}")]
    NotFound {
        provider: ProviderId,
        package: String,
        version: String,
    },

    /// The upstream could not be reached; retrying may help.
    #[error("{provider} is unavailable: {message}")]
    UpstreamUnavailable {
        provider: ProviderId,
        message: String,
    },

    /// The request itself makes no sense for this provider.
    #[error("invalid request for {provider}: {message}")]
    Invalid {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::UpstreamUnavailable { .. })
    }

    pub(crate) fn from_transport(
        provider: &ProviderId,
        package: &str,
        version: &str,
        err: TransportError,
    ) -> Self {
        match err {
            TransportError::NotFound { .. } => ProviderError::NotFound {
                provider: provider.clone(),
                package: package.to_string(),
                version: version.to_string(),
            },
            other => ProviderError::UpstreamUnavailable {
                provider: provider.clone(),
                message: other.to_string(),
            },
        }
    }
}

/// A source of extension packages.
///
/// Resolution is read-only: it may query upstream indexes but never writes
/// to disk.
pub trait Provider: Send + Sync {
    /// Identity used in cache keys and manifests.
    fn id(&self) -> ProviderId;

    /// Turn a package name and version token into a concrete download target.
    fn resolve(&self, package: &str, token: &VersionToken)
        -> Result<PackageLocator, ProviderError>;
}

/// Shared services providers are built from.
///
/// Providers themselves are cheap and built per install; the transport and
/// ref lister are shared.
#[derive(Clone)]
pub struct ProviderSet {
    transport: Arc<dyn Transport>,
    refs: Arc<dyn RefLister>,
    pecl_url: Url,
}

impl ProviderSet {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ProviderSet {
            transport,
            refs: Arc::new(GitRefLister),
            pecl_url: Url::parse(DEFAULT_PECL_URL).expect("default PECL URL is valid"),
        }
    }

    pub fn with_refs(mut self, refs: Arc<dyn RefLister>) -> Self {
        self.refs = refs;
        self
    }

    pub fn with_pecl_url(mut self, url: Url) -> Self {
        self.pecl_url = url;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Build the provider a spec selects.
    pub fn provider_for(&self, spec: &ProviderSpec) -> Box<dyn Provider> {
        match spec {
            ProviderSpec::Pecl { .. } => Box::new(PeclProvider::new(
                self.pecl_url.clone(),
                Arc::clone(&self.transport),
            )),
            ProviderSpec::GitHub { owner, repo } => Box::new(GitProvider::github(
                owner,
                repo,
                Arc::clone(&self.refs),
            )),
            ProviderSpec::Bitbucket { owner, repo } => Box::new(GitProvider::bitbucket(
                owner,
                repo,
                Arc::clone(&self.refs),
            )),
            ProviderSpec::Local { path } => Box::new(LocalProvider::new(path.clone())),
        }
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("pecl_url", &self.pecl_url.as_str())
            .finish_non_exhaustive()
    }
}
