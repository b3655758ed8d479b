//! Package sources.
//!
//! Providers resolve a package name and version token to a download target
//! (PECL index, git hosts, local paths). The downloader fetches targets into
//! the artifact cache and extracts them for building.

pub mod archive;
pub mod cache;
pub mod download;
pub mod git;
pub mod local;
pub mod pecl;
pub mod provider;

pub use cache::{ArtifactCache, CacheKey};
pub use download::{Downloader, ExtractedSource, FetchError, RetryPolicy};
pub use git::{GitProvider, GitRefLister, RefLister, RemoteRef};
pub use local::LocalProvider;
pub use pecl::PeclProvider;
pub use provider::{Provider, ProviderError, ProviderSet};
