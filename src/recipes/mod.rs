//! Extension factory - the registry of build recipes.
//!
//! Lookups are pure reads. An unknown name is not an error: the install
//! pipeline falls back to [`ExtensionRecipe::generic`].
//!
//! Extra recipes are loaded from TOML files:
//!
//! ```toml
//! [[recipe]]
//! name = "memcached"
//! configure_flags = ["--disable-memcached-sasl"]
//! php_versions = ">=7.0"
//! ```

mod builtin;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::recipe::normalize_name;
use crate::core::ExtensionRecipe;

#[derive(Debug, Deserialize)]
struct RecipeFile {
    #[serde(default)]
    recipe: Vec<ExtensionRecipe>,
}

/// Registry mapping extension names to recipes.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFactory {
    recipes: HashMap<String, ExtensionRecipe>,
}

impl ExtensionFactory {
    /// An empty factory.
    pub fn new() -> Self {
        ExtensionFactory::default()
    }

    /// A factory holding the built-in recipes.
    pub fn with_builtin() -> Self {
        let mut factory = ExtensionFactory::new();
        for recipe in builtin::recipes() {
            factory.register(recipe);
        }
        factory
    }

    /// Register a recipe, returning the one it replaced.
    pub fn register(&mut self, recipe: ExtensionRecipe) -> Option<ExtensionRecipe> {
        self.recipes.insert(recipe.key(), recipe)
    }

    /// Find the recipe for `name`, ignoring case.
    pub fn lookup(&self, name: &str) -> Option<&ExtensionRecipe> {
        self.recipes.get(&normalize_name(name))
    }

    /// The registered recipe, or the generic one.
    pub fn recipe_or_generic(&self, name: &str) -> ExtensionRecipe {
        self.lookup(name)
            .cloned()
            .unwrap_or_else(|| ExtensionRecipe::generic(normalize_name(name)))
    }

    /// Merge `[[recipe]]` tables from a TOML file. Later recipes win by name.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recipe file: {}", path.display()))?;
        self.load_str(&text)
            .with_context(|| format!("failed to parse recipe file: {}", path.display()))
    }

    pub fn load_str(&mut self, text: &str) -> Result<usize> {
        let file: RecipeFile = toml::from_str(text)?;
        let count = file.recipe.len();
        for recipe in file.recipe {
            tracing::debug!("loaded recipe {}", recipe.name);
            self.register(recipe);
        }
        Ok(count)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.recipes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProviderSpec;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_lookup_is_absent() {
        let factory = ExtensionFactory::with_builtin();
        assert!(factory.lookup("apcu").is_none());
        assert!(ExtensionFactory::new().lookup("xdebug").is_none());
    }

    #[test]
    fn test_lookup_ignores_case() {
        let factory = ExtensionFactory::with_builtin();
        let xdebug = factory.lookup("XDebug").unwrap();
        assert!(xdebug.zend);
        assert_eq!(
            factory.lookup("swoole").unwrap().provider,
            ProviderSpec::github("swoole", "swoole-src")
        );
        assert!(factory.lookup("opcache").unwrap().bundled);
    }

    #[test]
    fn test_recipe_or_generic() {
        let factory = ExtensionFactory::with_builtin();
        let apcu = factory.recipe_or_generic("APCu");
        assert_eq!(apcu, ExtensionRecipe::generic("apcu"));
        assert_eq!(factory.recipe_or_generic("yaml").configure_flags, vec!["--with-yaml"]);
    }

    #[test]
    fn test_load_file_overrides_builtin() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("recipes.toml");
        std::fs::write(
            &path,
            r#"
[[recipe]]
name = "yaml"
configure_flags = ["--with-yaml=/opt/libyaml"]

[[recipe]]
name = "memcached"
provider = "pecl"
configure_flags = ["--disable-memcached-sasl"]
"#,
        )
        .unwrap();

        let mut factory = ExtensionFactory::with_builtin();
        let before = factory.len();
        assert_eq!(factory.load_file(&path).unwrap(), 2);
        assert_eq!(factory.len(), before + 1);
        assert_eq!(
            factory.lookup("yaml").unwrap().configure_flags,
            vec!["--with-yaml=/opt/libyaml"]
        );
        assert!(factory.names().contains(&"memcached"));
    }

    #[test]
    fn test_load_file_reports_bad_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.toml");
        std::fs::write(&path, "[[recipe]]\nname = 3\n").unwrap();

        let err = ExtensionFactory::new().load_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }
}
