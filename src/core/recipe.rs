//! Build recipes for named extensions.

use std::collections::BTreeMap;

use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::core::locator::Checksum;
use crate::core::provider_spec::ProviderSpec;

/// When a custom hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPoint {
    /// Before `phpize`, inside the extracted source directory.
    PreConfigure,
    /// After `make` succeeds.
    PostBuild,
}

/// An extra command run as part of a recipe's build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHook {
    pub when: HookPoint,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Build metadata for one extension.
///
/// Recipes are read-only once registered with the factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRecipe {
    /// Extension name as loaded by PHP (`apcu`, `xdebug`)
    pub name: String,

    #[serde(default)]
    pub provider: ProviderSpec,

    /// Flags passed to `./configure`
    #[serde(default)]
    pub configure_flags: Vec<String>,

    /// Extra CFLAGS for configure and make
    #[serde(default)]
    pub cflags: Vec<String>,

    /// Runtime versions this extension builds against
    #[serde(default)]
    pub php_versions: Option<VersionReq>,

    /// Extension versions known not to build
    #[serde(default)]
    pub broken_versions: Vec<String>,

    /// Pinned archive checksums by extension version
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,

    #[serde(default)]
    pub hooks: Vec<BuildHook>,

    /// Run `phpize` before configure
    #[serde(default = "default_true")]
    pub phpize: bool,

    /// Built from the runtime's own source tree (`ext/<name>`)
    #[serde(default)]
    pub bundled: bool,

    /// Built module file stem, when it differs from the name
    #[serde(default)]
    pub artifact: Option<String>,

    /// Load with `zend_extension=` instead of `extension=`
    #[serde(default)]
    pub zend: bool,

    /// Extra ini directives written after the load line
    #[serde(default)]
    pub ini: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl ExtensionRecipe {
    /// Recipe used when nothing is registered under `name`.
    ///
    /// PECL by package name, `phpize && ./configure && make`, no flags.
    pub fn generic(name: impl Into<String>) -> Self {
        ExtensionRecipe {
            name: name.into(),
            provider: ProviderSpec::default(),
            configure_flags: Vec::new(),
            cflags: Vec::new(),
            php_versions: None,
            broken_versions: Vec::new(),
            checksums: BTreeMap::new(),
            hooks: Vec::new(),
            phpize: true,
            bundled: false,
            artifact: None,
            zend: false,
            ini: BTreeMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderSpec) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configure_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    pub fn with_php_versions(mut self, req: &str) -> Self {
        self.php_versions = VersionReq::parse(req).ok();
        self
    }

    pub fn with_ini(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ini.insert(key.into(), value.into());
        self
    }

    pub fn zend(mut self) -> Self {
        self.zend = true;
        self
    }

    pub fn bundled(mut self) -> Self {
        self.bundled = true;
        self
    }

    /// Lookup key: extension names are case-insensitive.
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// File stem of the built module (`modules/<stem>.so`).
    pub fn artifact_stem(&self) -> String {
        self.artifact
            .clone()
            .unwrap_or_else(|| normalize_name(&self.name).replace('-', "_"))
    }

    pub fn hooks_at(&self, when: HookPoint) -> impl Iterator<Item = &BuildHook> {
        self.hooks.iter().filter(move |h| h.when == when)
    }

    pub fn is_broken(&self, version: &str) -> bool {
        self.broken_versions.iter().any(|v| v == version)
    }

    pub fn pinned_checksum(&self, version: &str) -> Option<Checksum> {
        self.checksums.get(version).map(Checksum::sha256)
    }
}

/// Canonical form of an extension name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_recipe() {
        let recipe = ExtensionRecipe::generic("APCu");
        assert_eq!(recipe.key(), "apcu");
        assert_eq!(recipe.artifact_stem(), "apcu");
        assert_eq!(recipe.provider, ProviderSpec::pecl());
        assert!(recipe.phpize);
        assert!(!recipe.zend);
        assert!(recipe.configure_flags.is_empty());
    }

    #[test]
    fn test_recipe_from_toml() {
        let recipe: ExtensionRecipe = toml::from_str(
            r#"
name = "xdebug"
provider = "github:xdebug/xdebug"
configure_flags = ["--enable-xdebug"]
php_versions = ">=8.0, <8.5"
broken_versions = ["3.3.0alpha3"]
zend = true

[checksums]
"3.3.1" = "ABC123"

[ini]
"xdebug.mode" = "debug"

[[hooks]]
when = "post-build"
program = "strip"
args = ["modules/xdebug.so"]
"#,
        )
        .unwrap();

        assert_eq!(recipe.provider, ProviderSpec::github("xdebug", "xdebug"));
        assert!(recipe.zend);
        assert!(recipe.phpize);
        assert!(recipe.is_broken("3.3.0alpha3"));
        assert_eq!(
            recipe.pinned_checksum("3.3.1"),
            Some(Checksum::sha256("abc123"))
        );
        assert_eq!(recipe.hooks_at(HookPoint::PostBuild).count(), 1);
        assert_eq!(recipe.hooks_at(HookPoint::PreConfigure).count(), 0);
        assert_eq!(recipe.ini.get("xdebug.mode").map(String::as_str), Some("debug"));
    }

    #[test]
    fn test_artifact_stem_replaces_dashes() {
        let recipe = ExtensionRecipe::generic("php-ext");
        assert_eq!(recipe.artifact_stem(), "php_ext");
    }
}
