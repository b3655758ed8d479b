//! The downloader: resolve, fetch into the cache, verify, extract.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::core::{Checksum, LocatorSource, PackageLocator, PackageXml, VersionToken};
use crate::sources::archive::extract_tarball;
use crate::sources::cache::{ArtifactCache, CacheKey, CacheMeta, CachedArtifact};
use crate::sources::provider::{Provider, ProviderError};
use crate::util::cancel::CancelToken;
use crate::util::context::InstallContext;
use crate::util::fs::{copy_dir_all, ensure_dir, find_dir_containing, remove_dir_all_if_exists};
use crate::util::hash::HashingWriter;
use crate::util::http::{Transport, TransportError};
use crate::util::shell::Status;

/// How deep below the work directory `config.m4` is searched for.
const SOURCE_SEARCH_DEPTH: usize = 3;

/// Bounded exponential backoff for transient upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each retry
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << exp)
    }
}

/// Why a download failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("checksum mismatch for {url}: expected {expected}, got sha256:{actual}")]
    Integrity {
        url: String,
        expected: Checksum,
        actual: String,
    },

    #[error("failed to extract {archive}: {message}")]
    Extract { archive: PathBuf, message: String },

    #[error("download cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Unpacked sources ready to build.
#[derive(Debug, Clone)]
pub struct ExtractedSource {
    /// Fresh working directory owned by this install attempt
    pub work_dir: PathBuf,
    /// Directory holding `config.m4`
    pub source_dir: PathBuf,
    pub locator: PackageLocator,
    /// Digest of the cached archive (None for directory sources)
    pub archive_sha256: Option<String>,
    pub package_xml: Option<PackageXml>,
    /// Whether the archive came from the cache
    pub cache_hit: bool,
}

impl ExtractedSource {
    /// Remove the working directory.
    pub fn discard(&self) -> anyhow::Result<()> {
        remove_dir_all_if_exists(&self.work_dir)
    }
}

/// Fetches packages through providers into the artifact cache.
pub struct Downloader {
    cache: ArtifactCache,
    transport: Arc<dyn Transport>,
    build_root: PathBuf,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new(cache: ArtifactCache, transport: Arc<dyn Transport>, build_root: impl Into<PathBuf>) -> Self {
        Downloader {
            cache,
            transport,
            build_root: build_root.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// Resolve, fetch and extract in one go.
    ///
    /// `expected` takes precedence over any checksum the provider reports.
    pub fn download(
        &self,
        provider: &dyn Provider,
        package: &str,
        token: &VersionToken,
        expected: Option<Checksum>,
        ctx: &InstallContext,
    ) -> Result<ExtractedSource, FetchError> {
        let locator = self.resolve(provider, package, token, ctx)?;
        self.fetch(&locator, expected.as_ref(), ctx)
    }

    /// Resolve through the provider, retrying transient failures.
    pub fn resolve(
        &self,
        provider: &dyn Provider,
        package: &str,
        token: &VersionToken,
        ctx: &InstallContext,
    ) -> Result<PackageLocator, FetchError> {
        ctx.shell
            .status(Status::Resolving, format!("{} {} ({})", package, token, provider.id()));
        self.retrying(ctx, "resolve", || {
            provider.resolve(package, token).map_err(FetchError::from)
        })
    }

    /// Fetch (or reuse) the archive for `locator` and extract it.
    pub fn fetch(
        &self,
        locator: &PackageLocator,
        expected: Option<&Checksum>,
        ctx: &InstallContext,
    ) -> Result<ExtractedSource, FetchError> {
        if ctx.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        match &locator.source {
            LocatorSource::Directory(path) => self.extract(locator, SourceInput::Directory(path), None, false, ctx),
            LocatorSource::Archive { url, file_name } => {
                let expected = expected.or(locator.checksum.as_ref());
                let (artifact, cache_hit) = self.fetch_archive(locator, url, file_name, expected, ctx)?;
                self.extract(
                    locator,
                    SourceInput::Archive(&artifact.archive),
                    Some(artifact.meta.sha256.clone()),
                    cache_hit,
                    ctx,
                )
            }
        }
    }

    fn fetch_archive(
        &self,
        locator: &PackageLocator,
        url: &Url,
        file_name: &str,
        expected: Option<&Checksum>,
        ctx: &InstallContext,
    ) -> Result<(CachedArtifact, bool), FetchError> {
        let key = CacheKey::for_locator(locator);

        self.cache.with_lock(&key, || -> Result<(CachedArtifact, bool), FetchError> {
            if let Some(hit) = self.cache.lookup(&key)? {
                match expected {
                    Some(sum) if !sum.matches(&hit.meta.sha256) => {
                        tracing::warn!(
                            "cached {} does not match {}, fetching again",
                            key,
                            sum
                        );
                    }
                    _ => {
                        tracing::debug!("cache hit for {}", key);
                        ctx.shell.status(Status::Fresh, format!("{} (cached)", key));
                        return Ok((hit, true));
                    }
                }
            }

            ctx.shell.status(Status::Fetching, url);
            let artifact = self.retrying(ctx, "fetch", || {
                self.fetch_once(&key, url, file_name, expected, ctx)
            })?;
            Ok((artifact, false))
        })
    }

    /// One fetch attempt into a fresh temp file in the entry directory.
    fn fetch_once(
        &self,
        key: &CacheKey,
        url: &Url,
        file_name: &str,
        expected: Option<&Checksum>,
        ctx: &InstallContext,
    ) -> Result<CachedArtifact, FetchError> {
        let mut pending = self.cache.begin(key)?;
        let progress = ctx.shell.bytes_progress(key, None);

        let result = {
            let sink = CancelWriter {
                inner: progress.wrap_write(pending.file()),
                cancel: &ctx.cancel,
            };
            let mut writer = HashingWriter::new(sink);
            let result = self.transport.fetch(url, &mut writer);
            let size = writer.written();
            let (_, digest) = writer.finish();
            result.map(|_| (size, digest))
        };
        progress.finish();

        if ctx.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let (size, digest) = result.map_err(|e| match e {
            TransportError::Io(e) => FetchError::Io(anyhow::Error::new(e).context(format!("failed to download {}", url))),
            other => FetchError::Provider(ProviderError::from_transport(
                &key.provider,
                &key.package,
                &key.version,
                other,
            )),
        })?;

        pending
            .file()
            .sync_all()
            .map_err(|e| anyhow::Error::new(e).context("failed to flush download"))?;

        if let Some(expected) = expected {
            if !expected.matches(&digest) {
                // Dropping `pending` removes the temp file.
                return Err(FetchError::Integrity {
                    url: url.to_string(),
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }

        tracing::info!("downloaded {} ({} bytes, sha256:{})", url, size, digest);
        let artifact = self.cache.commit(
            pending,
            CacheMeta {
                url: url.to_string(),
                file_name: file_name.to_string(),
                sha256: digest,
                size,
            },
        )?;
        Ok(artifact)
    }

    fn extract(
        &self,
        locator: &PackageLocator,
        input: SourceInput<'_>,
        archive_sha256: Option<String>,
        cache_hit: bool,
        ctx: &InstallContext,
    ) -> Result<ExtractedSource, FetchError> {
        ensure_dir(&self.build_root)?;
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", locator.package, locator.version.replace('/', "-")))
            .tempdir_in(&self.build_root)
            .map_err(|e| anyhow::Error::new(e).context("failed to create build directory"))?
            .keep();

        ctx.shell.status(Status::Extracting, work_dir.display());
        let result = self.unpack_into(&work_dir, input, ctx);
        let source_dir = match result {
            Ok(dir) => dir,
            Err(e) => {
                if let Err(cleanup) = remove_dir_all_if_exists(&work_dir) {
                    tracing::warn!("failed to remove {}: {:#}", work_dir.display(), cleanup);
                }
                return Err(e);
            }
        };

        let package_xml = match PackageXml::find(&source_dir) {
            Ok(xml) => xml,
            Err(e) => {
                tracing::debug!("ignoring unreadable package.xml: {:#}", e);
                None
            }
        };

        Ok(ExtractedSource {
            work_dir,
            source_dir,
            locator: locator.clone(),
            archive_sha256,
            package_xml,
            cache_hit,
        })
    }

    fn unpack_into(
        &self,
        work_dir: &Path,
        input: SourceInput<'_>,
        ctx: &InstallContext,
    ) -> Result<PathBuf, FetchError> {
        let origin = match input {
            SourceInput::Archive(archive) => {
                extract_tarball(archive, work_dir).map_err(|e| FetchError::Extract {
                    archive: archive.to_path_buf(),
                    message: format!("{:#}", e),
                })?;
                archive.to_path_buf()
            }
            SourceInput::Directory(dir) => {
                let name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "src".into());
                copy_dir_all(dir, &work_dir.join(name))?;
                dir.to_path_buf()
            }
        };

        if ctx.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        find_dir_containing(work_dir, "config.m4", SOURCE_SEARCH_DEPTH).ok_or_else(|| {
            FetchError::Extract {
                archive: origin,
                message: "no config.m4 found; not a PHP extension source tree".to_string(),
            }
        })
    }

    fn retrying<T>(
        &self,
        ctx: &InstallContext,
        what: &str,
        mut op: impl FnMut() -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let max = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if ctx.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            match op() {
                Err(FetchError::Provider(e)) if e.is_retryable() && attempt < max => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        max,
                        e,
                        delay
                    );
                    if !ctx.cancel.sleep(delay) {
                        return Err(FetchError::Cancelled);
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

enum SourceInput<'a> {
    Archive(&'a Path),
    Directory(&'a Path),
}

/// Aborts a transfer once cancellation is requested.
struct CancelWriter<'a, W> {
    inner: W,
    cancel: &'a CancelToken,
}

impl<W: Write> Write for CancelWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            // `Interrupted` would be retried by `write_all`.
            return Err(io::Error::new(io::ErrorKind::Other, "download cancelled"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
