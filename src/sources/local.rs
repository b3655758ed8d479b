//! Local provider - source trees and archives already on disk.

use std::path::{Path, PathBuf};

use url::Url;

use crate::core::{Checksum, PackageLocator, PackageXml, ProviderId, VersionToken};
use crate::sources::provider::{Provider, ProviderError};
use crate::util::hash::sha256_file;

/// Version used for source trees that carry no version information.
pub const UNVERSIONED: &str = "0.0.0-local";

pub struct LocalProvider {
    path: PathBuf,
}

impl LocalProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalProvider { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn invalid(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::Invalid {
            provider: ProviderId::Local,
            message: message.into(),
        }
    }
}

fn is_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Version suffix of an archive file name (`apcu-5.1.22.tgz` -> `5.1.22`).
fn version_from_file_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let stem = name
        .strip_suffix(".tgz")
        .or_else(|| name.strip_suffix(".tar.gz"))?;
    let (_, version) = stem.rsplit_once('-')?;
    version
        .starts_with(|c: char| c.is_ascii_digit())
        .then(|| version.to_string())
}

impl Provider for LocalProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Local
    }

    fn resolve(
        &self,
        package: &str,
        token: &VersionToken,
    ) -> Result<PackageLocator, ProviderError> {
        if !self.path.exists() {
            return Err(ProviderError::NotFound {
                provider: ProviderId::Local,
                package: package.to_string(),
                version: self.path.display().to_string(),
            });
        }
        let path = self
            .path
            .canonicalize()
            .map_err(|e| self.invalid(format!("{}: {}", self.path.display(), e)))?;

        if path.is_dir() {
            let from_xml = PackageXml::find(&path)
                .map_err(|e| self.invalid(format!("{:#}", e)))?
                .and_then(|xml| xml.release_version);
            let version = from_xml
                .or_else(|| token.literal().map(str::to_string))
                .unwrap_or_else(|| UNVERSIONED.to_string());
            return Ok(PackageLocator::directory(
                ProviderId::Local,
                package,
                version,
                path,
            ));
        }

        if !is_archive(&path) {
            return Err(self.invalid(format!(
                "{} is neither a directory nor a .tgz archive",
                path.display()
            )));
        }

        let version = token
            .literal()
            .map(str::to_string)
            .or_else(|| version_from_file_name(&path))
            .unwrap_or_else(|| UNVERSIONED.to_string());
        let url = Url::from_file_path(&path)
            .map_err(|_| self.invalid(format!("cannot build file URL for {}", path.display())))?;
        let digest = sha256_file(&path).map_err(|e| self.invalid(format!("{:#}", e)))?;
        Ok(PackageLocator::archive(ProviderId::Local, package, version, url)
            .with_checksum(Some(Checksum::sha256(digest))))
    }
}
