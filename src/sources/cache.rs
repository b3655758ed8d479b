//! Content-keyed archive cache.
//!
//! ```text
//! <cache>/
//! └── <provider>/<package>/<version>/
//!     ├── APCu-5.1.22.tgz
//!     └── meta.toml        # url, sha256, size
//! ```
//!
//! An entry is valid only when `meta.toml` exists and the archive hashes to
//! the recorded digest. Archives and metadata only appear through rename, so
//! a reader never sees a half-written entry.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::core::{LocatorSource, PackageLocator, ProviderId};
use crate::util::fs::{dir_size, ensure_dir, remove_dir_all_if_exists, remove_file_if_exists, write_atomic};
use crate::util::hash::sha256_file;
use crate::util::lock::with_path_lock;

const META_FILE: &str = "meta.toml";
const LOCK_NAMESPACE: &str = "cache";

/// Length of the digest suffix that tells local archives apart.
const LOCAL_DIGEST_LEN: usize = 12;

/// Cache key: (provider, package, resolved version).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: ProviderId,
    pub package: String,
    pub version: String,
}

impl CacheKey {
    pub fn new(provider: ProviderId, package: impl Into<String>, version: impl Into<String>) -> Self {
        CacheKey {
            provider,
            package: package.into(),
            version: version.into(),
        }
    }

    /// Key for the archive `locator` points at.
    ///
    /// A local archive's version comes from its file name, which says nothing
    /// about the bytes, so its digest becomes part of the version segment.
    pub fn for_locator(locator: &PackageLocator) -> Self {
        let version = match (&locator.provider, &locator.source, &locator.checksum) {
            (ProviderId::Local, LocatorSource::Archive { .. }, Some(sum)) => {
                let digest = sum.sha256.get(..LOCAL_DIGEST_LEN).unwrap_or(&sum.sha256);
                format!("{}+{}", locator.version, digest)
            }
            _ => locator.version.clone(),
        };
        CacheKey::new(locator.provider.clone(), &locator.package, version)
    }

    /// Directory of this entry, relative to the cache root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(self.provider.cache_segment())
            .join(path_segment(&self.package))
            .join(path_segment(&self.version))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.provider, self.package, self.version)
    }
}

fn path_segment(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | '+' => c,
            _ => '_',
        })
        .collect()
}

/// Recorded facts about a cached archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub url: String,
    pub file_name: String,
    pub sha256: String,
    pub size: u64,
}

/// A valid cache entry.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    pub archive: PathBuf,
    pub meta: CacheMeta,
}

/// A cache entry found on disk, for listing.
#[derive(Debug, Clone)]
pub struct CacheListing {
    /// Entry directory relative to the cache root
    pub key: PathBuf,
    pub path: PathBuf,
    pub meta: CacheMeta,
    pub size: u64,
}

/// An archive being written into an entry directory.
///
/// Dropping it without [`ArtifactCache::commit`] discards the bytes.
#[derive(Debug)]
pub struct PendingArtifact {
    key: CacheKey,
    file: NamedTempFile,
}

impl PendingArtifact {
    pub fn file(&mut self) -> &mut std::fs::File {
        self.file.as_file_mut()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactCache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_dir())
    }

    /// Serialize writers of one entry within this process.
    pub fn with_lock<T>(&self, key: &CacheKey, f: impl FnOnce() -> T) -> T {
        with_path_lock(LOCK_NAMESPACE, &self.entry_dir(key), f)
    }

    /// The valid entry for `key`, if any.
    ///
    /// Entries with missing metadata, a missing archive or a digest mismatch
    /// are treated as absent.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<CachedArtifact>> {
        let dir = self.entry_dir(key);
        let meta_path = dir.join(META_FILE);
        if !meta_path.is_file() {
            return Ok(None);
        }

        let meta: CacheMeta = match std::fs::read_to_string(&meta_path)
            .map_err(anyhow::Error::from)
            .and_then(|text| toml::from_str(&text).map_err(anyhow::Error::from))
        {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("ignoring unreadable cache metadata {}: {}", meta_path.display(), e);
                return Ok(None);
            }
        };

        let archive = dir.join(&meta.file_name);
        if !archive.is_file() {
            return Ok(None);
        }
        let actual = sha256_file(&archive)?;
        if actual != meta.sha256 {
            tracing::warn!("cache entry {} is corrupt, it will be replaced", key);
            return Ok(None);
        }

        Ok(Some(CachedArtifact { archive, meta }))
    }

    /// Start writing a new archive for `key`.
    ///
    /// The temp file lives in the entry directory so the final rename stays
    /// on one filesystem.
    pub fn begin(&self, key: &CacheKey) -> Result<PendingArtifact> {
        let dir = self.entry_dir(key);
        ensure_dir(&dir)?;
        let file = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        Ok(PendingArtifact {
            key: key.clone(),
            file,
        })
    }

    /// Promote a verified archive to a valid entry, replacing any old one.
    pub fn commit(&self, pending: PendingArtifact, meta: CacheMeta) -> Result<CachedArtifact> {
        let dir = self.entry_dir(&pending.key);
        let meta_path = dir.join(META_FILE);
        let archive = dir.join(&meta.file_name);

        // Invalidate first so a crash between the renames leaves no valid entry.
        remove_file_if_exists(&meta_path)?;
        pending
            .file
            .persist(&archive)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to move archive into {}", archive.display()))?;

        let text = toml::to_string(&meta).context("failed to serialize cache metadata")?;
        write_atomic(&meta_path, text.as_bytes())?;

        Ok(CachedArtifact { archive, meta })
    }

    /// Remove the entry for `key`. Returns whether anything was removed.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let dir = self.entry_dir(key);
        if !dir.exists() {
            return Ok(false);
        }
        self.with_lock(key, || remove_dir_all_if_exists(&dir))?;
        Ok(true)
    }

    /// All entries with readable metadata.
    pub fn entries(&self) -> Result<Vec<CacheListing>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(4)
            .max_depth(4)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("failed to walk {}", self.root.display()))?;
            if entry.file_name() != META_FILE {
                continue;
            }
            let Some(dir) = entry.path().parent() else {
                continue;
            };
            let text = std::fs::read_to_string(entry.path())
                .with_context(|| format!("failed to read {}", entry.path().display()))?;
            let Ok(meta) = toml::from_str::<CacheMeta>(&text) else {
                continue;
            };
            out.push(CacheListing {
                key: dir.strip_prefix(&self.root).unwrap_or(dir).to_path_buf(),
                path: dir.to_path_buf(),
                size: dir_size(dir),
                meta,
            });
        }
        Ok(out)
    }

    /// Delete every entry. Returns the number of bytes freed.
    pub fn clean(&self) -> Result<u64> {
        if !self.root.exists() {
            return Ok(0);
        }
        let size = dir_size(&self.root);
        remove_dir_all_if_exists(&self.root)?;
        Ok(size)
    }
}
