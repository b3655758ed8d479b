//! Test fixtures for creating archives and runtimes.

use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::core::{RuntimeVersion, TargetRuntime};

enum Entry {
    File { path: String, content: Vec<u8> },
    /// Written into the header verbatim, skipping tar's path checks
    RawFile { path: String, content: Vec<u8> },
    Symlink { path: String, target: String },
}

/// Builder for gzip-compressed tarballs.
///
/// Output is deterministic: the same entries always give the same bytes.
#[derive(Default)]
pub struct TarballBuilder {
    entries: Vec<Entry>,
}

impl TarballBuilder {
    pub fn new() -> Self {
        TarballBuilder::default()
    }

    pub fn file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.entries.push(Entry::File {
            path: path.to_string(),
            content: content.into(),
        });
        self
    }

    /// Add a file whose name tar itself would refuse (`../evil`).
    pub fn raw_path_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.entries.push(Entry::RawFile {
            path: path.to_string(),
            content: content.into(),
        });
        self
    }

    pub fn symlink(mut self, path: &str, target: &str) -> Self {
        self.entries.push(Entry::Symlink {
            path: path.to_string(),
            target: target.to_string(),
        });
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for entry in self.entries {
            match entry {
                Entry::File { path, content } => {
                    let mut header = file_header(content.len());
                    builder
                        .append_data(&mut header, &path, content.as_slice())
                        .unwrap();
                }
                Entry::RawFile { path, content } => {
                    let mut header = file_header(content.len());
                    let name = &mut header.as_old_mut().name;
                    name[..path.len()].copy_from_slice(path.as_bytes());
                    header.set_cksum();
                    builder.append(&header, content.as_slice()).unwrap();
                }
                Entry::Symlink { path, target } => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_mtime(0);
                    builder.append_link(&mut header, &path, &target).unwrap();
                }
            }
        }

        builder.into_inner().unwrap().finish().unwrap()
    }

    pub fn write_to(self, path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, self.into_bytes()).unwrap();
    }
}

fn file_header(size: usize) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header
}

/// A PECL-style APCu release: `package.xml` beside `APCu-<version>/`.
pub fn apcu_tarball(version: &str) -> Vec<u8> {
    let package_xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package version="2.0">
 <name>APCu</name>
 <version>
  <release>{version}</release>
  <api>5.1.0</api>
 </version>
 <providesextension>apcu</providesextension>
 <extsrcrelease>
  <configureoption name="enable-apcu-debug" default="no" prompt="Enable internal debugging in APCu"/>
 </extsrcrelease>
</package>
"#
    );
    let dir = format!("APCu-{}", version);

    TarballBuilder::new()
        .file("package.xml", package_xml)
        .file(
            &format!("{}/config.m4", dir),
            "PHP_ARG_ENABLE([apcu], [whether to enable APCu support])\n",
        )
        .file(&format!("{}/php_apc.c", dir), "/* apcu */\n")
        .into_bytes()
}

/// A runtime laid out under `prefix` with stub `phpize` and `php-config`.
pub fn fake_runtime(prefix: &Path, version: &str) -> TargetRuntime {
    let bin = prefix.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::write(bin.join("phpize"), "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::write(bin.join("php-config"), "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::create_dir_all(prefix.join("include/php")).unwrap();

    TargetRuntime::from_prefix(RuntimeVersion::parse(version).unwrap(), prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tarballs_are_deterministic() {
        assert_eq!(apcu_tarball("5.1.22"), apcu_tarball("5.1.22"));
        assert_ne!(apcu_tarball("5.1.22"), apcu_tarball("5.1.23"));
    }

    #[test]
    fn test_fake_runtime_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rt = fake_runtime(&tmp.path().join("php-8.3"), "8.3");
        assert!(rt.phpize().is_file());
        assert!(rt.php_config().is_file());
        assert_eq!(rt.version().label(), "8.3");
    }
}
