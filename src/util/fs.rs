//! Filesystem utilities.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Recursively copy a directory.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory: {}", dst.display()))?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if ty.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a file, ignoring a missing one.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("failed to remove file: {}", path.display()))
        }
    }
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write bytes to `path` through a sibling temp file and an atomic rename.
///
/// Readers either see the old contents or the new ones, never a torn write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    ensure_dir(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to write file: {}", path.display()))?;
    Ok(())
}

/// A copy waiting next to its destination. Dropping it discards the copy.
#[derive(Debug)]
pub struct StagedFile {
    tmp: NamedTempFile,
    dst: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    /// Rename the copy over the destination.
    pub fn commit(self) -> Result<()> {
        self.tmp
            .persist(&self.dst)
            .with_context(|| format!("failed to install {}", self.dst.display()))?;
        Ok(())
    }
}

/// Copy `src` into a temp file in `dst`'s directory without touching `dst`.
pub fn stage_copy(src: &Path, dst: &Path) -> Result<StagedFile> {
    let parent = dst
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", dst.display()))?;
    ensure_dir(parent)?;

    let tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    fs::copy(src, tmp.path()).with_context(|| {
        format!("failed to copy {} to {}", src.display(), tmp.path().display())
    })?;
    Ok(StagedFile {
        tmp,
        dst: dst.to_path_buf(),
    })
}

/// Find files matching glob patterns relative to a base directory.
pub fn glob_files(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();

    for pattern in patterns {
        let full_pattern = base.join(pattern);
        let pattern_str = full_pattern.to_string_lossy();

        for entry in
            glob(&pattern_str).with_context(|| format!("invalid glob pattern: {}", pattern))?
        {
            match entry {
                Ok(path) => {
                    if path.is_file() {
                        results.push(path);
                    }
                }
                Err(e) => {
                    tracing::warn!("glob error: {}", e);
                }
            }
        }
    }

    results.sort();
    results.dedup();
    Ok(results)
}

/// Find the shallowest directory under `root` that contains `marker`.
///
/// Ties at the same depth resolve to the lexicographically first path.
pub fn find_dir_containing(root: &Path, marker: &str, max_depth: usize) -> Option<PathBuf> {
    let mut best: Option<(usize, PathBuf)> = None;

    for entry in WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() && entry.file_name() == marker {
            let depth = entry.depth();
            let dir = match entry.path().parent() {
                Some(p) => p.to_path_buf(),
                None => continue,
            };
            if best.as_ref().map_or(true, |(d, _)| depth < *d) {
                best = Some((depth, dir));
            }
        }
    }

    best.map(|(_, dir)| dir)
}

/// Total size in bytes of everything under `path`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
