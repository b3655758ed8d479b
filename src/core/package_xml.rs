//! Minimal reader for PECL `package.xml` files.
//!
//! Only the handful of fields the installer needs are extracted: the release
//! version, the extension name, whether it is a Zend extension, and its
//! declared configure options.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

static RELEASE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<version>\s*<release>\s*([^<\s]+)\s*</release>").expect("valid regex")
});

static PROVIDES_EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<providesextension>\s*([^<\s]+)\s*</providesextension>").expect("valid regex")
});

static CONFIGURE_OPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<configureoption\s+([^>]*?)/?>").expect("valid regex"));

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).expect("valid regex"));

/// A `<configureoption>` declared by the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureOption {
    /// Option name without dashes (`enable-apcu-debug`)
    pub name: String,
    pub default: Option<String>,
    pub prompt: Option<String>,
}

/// Fields read from a `package.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageXml {
    pub release_version: Option<String>,
    pub extension_name: Option<String>,
    /// Declares a `<zendextsrcrelease>`
    pub zend: bool,
    pub configure_options: Vec<ConfigureOption>,
}

impl PackageXml {
    pub fn parse(text: &str) -> Self {
        let release_version = RELEASE_VERSION
            .captures(text)
            .map(|c| c[1].to_string());
        let extension_name = PROVIDES_EXTENSION
            .captures(text)
            .map(|c| c[1].to_string());
        let zend = text.contains("<zendextsrcrelease");

        let configure_options = CONFIGURE_OPTION
            .captures_iter(text)
            .filter_map(|c| {
                let mut option = ConfigureOption {
                    name: String::new(),
                    default: None,
                    prompt: None,
                };
                for attr in ATTRIBUTE.captures_iter(&c[1]) {
                    let value = attr[2].to_string();
                    match &attr[1] {
                        "name" => option.name = value,
                        "default" => option.default = Some(value),
                        "prompt" => option.prompt = Some(value),
                        _ => {}
                    }
                }
                (!option.name.is_empty()).then_some(option)
            })
            .collect();

        PackageXml {
            release_version,
            extension_name,
            zend,
            configure_options,
        }
    }

    /// Read `package.xml` (or the older `package2.xml`) from a source tree.
    ///
    /// PECL tarballs keep it one level above the extension sources, so the
    /// parent directory is checked too.
    pub fn find(dir: &Path) -> Result<Option<Self>> {
        let candidates = [dir.to_path_buf(), dir.parent().map(Path::to_path_buf).unwrap_or_default()];
        for base in candidates.iter().filter(|p| !p.as_os_str().is_empty()) {
            for name in ["package.xml", "package2.xml"] {
                let path = base.join(name);
                if path.is_file() {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    return Ok(Some(PackageXml::parse(&text)));
                }
            }
        }
        Ok(None)
    }
}
