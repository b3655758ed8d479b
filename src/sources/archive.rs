//! Source archive extraction.

use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use crate::util::fs::ensure_dir;

/// Extract a gzip-compressed tarball into `dest`.
///
/// Entries whose path (or symlink target) would land outside `dest` abort
/// the extraction. Device files, fifos and pax headers are skipped.
pub fn extract_tarball(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive: {}", archive.display()))?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
    ensure_dir(dest)?;

    for entry in tar.entries().context("failed to read archive entries")? {
        let mut entry = entry.context("failed to read archive entry")?;
        let entry_path = entry
            .path()
            .context("failed to read archive entry path")?
            .into_owned();

        let Some(relative) = contained(&entry_path) else {
            bail!(
                "archive entry escapes destination directory: {}",
                entry_path.display()
            );
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let output = dest.join(&relative);

        if let Some(parent) = output.parent() {
            ensure_dir(parent)?;
        }

        let entry_type = entry.header().entry_type();
        match entry_type {
            EntryType::Directory => ensure_dir(&output)?,
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                entry
                    .unpack(&output)
                    .with_context(|| format!("failed to extract {}", output.display()))?;
            }
            EntryType::Symlink | EntryType::Link => {
                let target = entry
                    .link_name()
                    .context("failed to read link target")?
                    .map(|t| t.into_owned());
                let Some(target) = target else { continue };

                let resolved = if entry_type == EntryType::Symlink {
                    relative.parent().unwrap_or(Path::new("")).join(&target)
                } else {
                    target.clone()
                };
                let Some(resolved) = contained(&resolved) else {
                    bail!(
                        "archive link escapes destination directory: {} -> {}",
                        entry_path.display(),
                        target.display()
                    );
                };

                if entry_type == EntryType::Symlink {
                    entry
                        .unpack(&output)
                        .with_context(|| format!("failed to extract link {}", output.display()))?;
                } else {
                    // Hard link targets are relative to the archive root.
                    std::fs::copy(dest.join(&resolved), &output).with_context(|| {
                        format!("failed to extract hard link {}", output.display())
                    })?;
                }
            }
            _ => {
                tracing::debug!(
                    "skipping unsupported entry type {:?}: {}",
                    entry_type,
                    entry_path.display()
                );
            }
        }
    }

    Ok(())
}

/// Normalize an archive path, or `None` if it climbs out of its root.
fn contained(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}
