//! The runtime's extension manifest.
//!
//! An ordered list of installed extensions, persisted as TOML next to the
//! runtime's ini files:
//!
//! ```toml
//! # hand-written comments survive updates
//! [[extension]]
//! name = "apcu"
//! version = "5.1.22"
//! provider = "pecl"
//! artifact = "/opt/php-8.1/lib/php/extensions/apcu.so"
//! sha256 = "..."
//! zend = false
//! enabled = true
//! ```
//!
//! Edits go through `toml_edit` so the file keeps its layout, and every write
//! replaces the file atomically.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use toml_edit::{value, ArrayOfTables, DocumentMut, Item, Table};

use crate::core::locator::ProviderId;
use crate::core::recipe::normalize_name;
use crate::util::fs::write_atomic;

const EXTENSIONS_KEY: &str = "extension";

/// One installed extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    pub provider: ProviderId,
    /// Installed module path
    pub artifact: PathBuf,
    /// SHA256 of the installed module
    pub sha256: String,
    #[serde(default)]
    pub zend: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    extension: Vec<ManifestEntry>,
}

/// Handle to a runtime's manifest file.
#[derive(Debug, Clone)]
pub struct ExtensionManifest {
    path: PathBuf,
}

impl ExtensionManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ExtensionManifest { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries in file order. A missing manifest is empty.
    pub fn entries(&self) -> Result<Vec<ManifestEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read manifest: {}", self.path.display()))?;
        let file: ManifestFile = toml::from_str(&text)
            .with_context(|| format!("failed to parse manifest: {}", self.path.display()))?;
        Ok(file.extension)
    }

    pub fn get(&self, name: &str) -> Result<Option<ManifestEntry>> {
        let key = normalize_name(name);
        Ok(self.entries()?.into_iter().find(|e| e.name == key))
    }

    /// Insert or update the entry for `entry.name`.
    ///
    /// An existing entry is updated in place and keeps its position; returns
    /// `true` in that case.
    pub fn upsert(&self, entry: &ManifestEntry) -> Result<bool> {
        let mut doc = self.load_document()?;
        let mut header = if has_entries(&doc) {
            None
        } else {
            take_trailing_comment(&mut doc)
        };
        let tables = extension_tables(&mut doc)?;

        let position = tables.iter().position(|t| table_name(t) == Some(entry.name.as_str()));
        let replaced = match position {
            Some(index) => {
                if let Some(table) = tables.get_mut(index) {
                    write_entry(table, entry);
                }
                true
            }
            None => {
                let mut table = Table::new();
                write_entry(&mut table, entry);
                // A comment-only file parses as document trailer, which
                // would otherwise render after the new table.
                if let Some(header) = header.take() {
                    table.decor_mut().set_prefix(header);
                }
                tables.push(table);
                false
            }
        };

        self.save_document(&doc)?;
        Ok(replaced)
    }

    /// Flip the `enabled` flag. Returns `false` if `name` is not installed.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let key = normalize_name(name);
        let mut doc = self.load_document()?;
        let tables = extension_tables(&mut doc)?;

        let Some(table) = tables.iter_mut().find(|t| table_name(t) == Some(key.as_str())) else {
            return Ok(false);
        };
        table["enabled"] = value(enabled);

        self.save_document(&doc)?;
        Ok(true)
    }

    /// Drop the entry for `name`, returning it if it was present.
    pub fn remove(&self, name: &str) -> Result<Option<ManifestEntry>> {
        let key = normalize_name(name);
        let existing = self.get(&key)?;
        if existing.is_none() {
            return Ok(None);
        }

        let mut doc = self.load_document()?;
        let tables = extension_tables(&mut doc)?;
        let position = tables.iter().position(|t| table_name(t) == Some(key.as_str()));
        let mut orphaned = None;
        if let Some(index) = position {
            let header = if index == 0 {
                tables.get(0).and_then(leading_comment)
            } else {
                None
            };
            tables.remove(index);

            // Keep the file's header with whatever is now first.
            if let Some(header) = header {
                match tables.get_mut(0) {
                    Some(next) => {
                        let rest = leading_comment(next).unwrap_or_default();
                        next.decor_mut().set_prefix(format!("{}{}", header, rest));
                    }
                    None => orphaned = Some(header),
                }
            }
        }
        if let Some(header) = orphaned {
            doc.set_trailing(header);
        }

        self.save_document(&doc)?;
        Ok(existing)
    }

    fn load_document(&self) -> Result<DocumentMut> {
        if !self.path.exists() {
            return Ok(DocumentMut::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read manifest: {}", self.path.display()))?;
        text.parse::<DocumentMut>()
            .with_context(|| format!("failed to parse manifest: {}", self.path.display()))
    }

    fn save_document(&self, doc: &DocumentMut) -> Result<()> {
        write_atomic(&self.path, doc.to_string().as_bytes())
            .with_context(|| format!("failed to write manifest: {}", self.path.display()))
    }
}

fn extension_tables(doc: &mut DocumentMut) -> Result<&mut ArrayOfTables> {
    if !doc.contains_key(EXTENSIONS_KEY) {
        doc.insert(EXTENSIONS_KEY, Item::ArrayOfTables(ArrayOfTables::new()));
    }
    match doc.get_mut(EXTENSIONS_KEY).and_then(Item::as_array_of_tables_mut) {
        Some(tables) => Ok(tables),
        None => bail!("manifest key `{}` is not an array of tables", EXTENSIONS_KEY),
    }
}

fn has_entries(doc: &DocumentMut) -> bool {
    doc.get(EXTENSIONS_KEY)
        .and_then(Item::as_array_of_tables)
        .is_some_and(|tables| !tables.is_empty())
}

fn take_trailing_comment(doc: &mut DocumentMut) -> Option<String> {
    let text = doc
        .trailing()
        .as_str()
        .filter(|t| !t.trim().is_empty())?
        .to_string();
    doc.set_trailing("");
    Some(text)
}

fn leading_comment(table: &Table) -> Option<String> {
    table
        .decor()
        .prefix()
        .and_then(|p| p.as_str())
        .filter(|p| !p.trim().is_empty())
        .map(str::to_string)
}

fn table_name(table: &Table) -> Option<&str> {
    table.get("name").and_then(Item::as_str)
}

fn write_entry(table: &mut Table, entry: &ManifestEntry) {
    table["name"] = value(entry.name.as_str());
    table["version"] = value(entry.version.as_str());
    table["provider"] = value(entry.provider.to_string());
    table["artifact"] = value(entry.artifact.display().to_string());
    table["sha256"] = value(entry.sha256.as_str());
    table["zend"] = value(entry.zend);
    table["enabled"] = value(entry.enabled);
}
