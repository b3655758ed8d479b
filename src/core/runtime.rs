//! Target runtimes that extensions are built against.
//!
//! Runtimes are built and switched by another tool; this module only knows
//! where a runtime keeps its build tools, its extension directory and its
//! extension manifest.
//!
//! ```text
//! <prefix>/
//! ├── bin/php-config
//! ├── bin/phpize
//! ├── include/php/
//! ├── lib/php/extensions/       # extension_dir
//! └── var/db/                   # ini scan dir
//!     ├── apcu.ini
//!     └── extensions.toml       # manifest
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::manifest::ExtensionManifest;
use crate::core::version::RuntimeVersion;
use crate::util::process::{ExecLimits, ProcessBuilder};

/// Manifest file name inside the config scan directory.
pub const MANIFEST_FILE: &str = "extensions.toml";

/// An installed PHP runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRuntime {
    version: RuntimeVersion,
    prefix: PathBuf,
    extension_dir: PathBuf,
    config_scan_dir: PathBuf,
    source_dir: Option<PathBuf>,
}

impl TargetRuntime {
    /// Describe a runtime installed under `prefix` with the standard layout.
    pub fn from_prefix(version: RuntimeVersion, prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        TargetRuntime {
            extension_dir: prefix.join("lib").join("php").join("extensions"),
            config_scan_dir: prefix.join("var").join("db"),
            version,
            prefix,
            source_dir: None,
        }
    }

    /// Point at the runtime's source tree, for bundled extensions.
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    /// Ask `php-config` for the real extension directory.
    ///
    /// Leaves the runtime unchanged if `php-config` is missing or fails.
    pub fn detect_extension_dir(mut self) -> Self {
        match self.query_php_config("--extension-dir") {
            Ok(Some(dir)) => self.extension_dir = PathBuf::from(dir),
            Ok(None) => {}
            Err(e) => tracing::debug!("php-config --extension-dir failed: {:#}", e),
        }
        self
    }

    fn query_php_config(&self, flag: &str) -> Result<Option<String>> {
        let php_config = self.php_config();
        if !php_config.exists() {
            return Ok(None);
        }
        let out = ProcessBuilder::new(&php_config)
            .arg(flag)
            .exec_limited(&ExecLimits::default())
            .with_context(|| format!("failed to run {}", php_config.display()))?;
        if !out.success() {
            return Ok(None);
        }
        let value = out.output.trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    pub fn version(&self) -> &RuntimeVersion {
        &self.version
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn php_config(&self) -> PathBuf {
        self.bin_dir().join("php-config")
    }

    pub fn phpize(&self) -> PathBuf {
        self.bin_dir().join("phpize")
    }

    pub fn include_dir(&self) -> PathBuf {
        self.prefix.join("include").join("php")
    }

    pub fn extension_dir(&self) -> &Path {
        &self.extension_dir
    }

    pub fn config_scan_dir(&self) -> &Path {
        &self.config_scan_dir
    }

    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    /// Source directory of a bundled extension, if the runtime ships one.
    pub fn bundled_extension_dir(&self, name: &str) -> Option<PathBuf> {
        let dir = self.source_dir.as_ref()?.join("ext").join(name);
        dir.join("config.m4").is_file().then_some(dir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.config_scan_dir.join(MANIFEST_FILE)
    }

    pub fn manifest(&self) -> ExtensionManifest {
        ExtensionManifest::new(self.manifest_path())
    }

    /// Path of the ini file that loads `name`.
    pub fn ini_path(&self, name: &str) -> PathBuf {
        self.config_scan_dir.join(format!("{}.ini", name))
    }

    /// Path of the ini file for `name` while disabled.
    pub fn disabled_ini_path(&self, name: &str) -> PathBuf {
        self.config_scan_dir.join(format!("{}.ini.disabled", name))
    }

    /// Key used to serialize installs against this runtime.
    pub fn lock_key(&self) -> PathBuf {
        self.prefix
            .canonicalize()
            .unwrap_or_else(|_| self.prefix.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runtime(prefix: &Path) -> TargetRuntime {
        TargetRuntime::from_prefix(RuntimeVersion::parse("8.1").unwrap(), prefix)
    }

    #[test]
    fn test_standard_layout() {
        let rt = runtime(Path::new("/opt/php-8.1"));
        assert_eq!(rt.php_config(), PathBuf::from("/opt/php-8.1/bin/php-config"));
        assert_eq!(rt.phpize(), PathBuf::from("/opt/php-8.1/bin/phpize"));
        assert_eq!(rt.include_dir(), PathBuf::from("/opt/php-8.1/include/php"));
        assert_eq!(
            rt.extension_dir(),
            Path::new("/opt/php-8.1/lib/php/extensions")
        );
        assert_eq!(
            rt.manifest_path(),
            PathBuf::from("/opt/php-8.1/var/db/extensions.toml")
        );
        assert_eq!(rt.ini_path("apcu"), PathBuf::from("/opt/php-8.1/var/db/apcu.ini"));
    }

    #[test]
    fn test_bundled_extension_dir() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("php-src");
        std::fs::create_dir_all(src.join("ext/opcache")).unwrap();
        std::fs::write(src.join("ext/opcache/config.m4"), "dnl").unwrap();

        let rt = runtime(tmp.path()).with_source_dir(&src);
        assert_eq!(
            rt.bundled_extension_dir("opcache"),
            Some(src.join("ext/opcache"))
        );
        assert_eq!(rt.bundled_extension_dir("apcu"), None);
        assert_eq!(runtime(tmp.path()).bundled_extension_dir("opcache"), None);
    }

    #[test]
    fn test_detect_extension_dir_without_php_config_keeps_default() {
        let tmp = TempDir::new().unwrap();
        let rt = runtime(tmp.path()).detect_extension_dir();
        assert_eq!(rt.extension_dir(), tmp.path().join("lib/php/extensions"));
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_extension_dir_from_php_config() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("php-config");
        std::fs::write(
            &script,
            "#!/bin/sh\necho /opt/php/lib/php/extensions/no-debug-non-zts-20210902\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let rt = runtime(tmp.path()).detect_extension_dir();
        assert_eq!(
            rt.extension_dir(),
            Path::new("/opt/php/lib/php/extensions/no-debug-non-zts-20210902")
        );
    }
}
