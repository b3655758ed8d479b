//! Implementation of `extbrew enable`, `disable`, `remove` and `list`.
//!
//! These only touch the runtime's ini files, manifest and extension
//! directory; nothing is rebuilt.

use anyhow::{bail, Context, Result};

use crate::core::recipe::normalize_name;
use crate::core::{ManifestEntry, TargetRuntime};
use crate::ops::install::{render_ini, ExtensionManager};
use crate::util::fs::{remove_file_if_exists, write_atomic};
use crate::util::lock::with_path_lock;

impl ExtensionManager {
    /// Installed extensions of `runtime`, in manifest order.
    pub fn list(&self, runtime: &TargetRuntime) -> Result<Vec<ManifestEntry>> {
        runtime.manifest().entries()
    }

    /// Load `name` again: rewrite its ini file and mark it enabled.
    pub fn enable(&self, runtime: &TargetRuntime, name: &str) -> Result<ManifestEntry> {
        let name = normalize_name(name);
        with_path_lock("runtime", &runtime.lock_key(), || {
            let entry = installed(runtime, &name)?;
            let settings = self
                .factory()
                .lookup(&name)
                .map(|r| r.ini.clone())
                .unwrap_or_default();

            write_atomic(
                &runtime.ini_path(&name),
                render_ini(entry.zend, &entry.artifact, &settings).as_bytes(),
            )?;
            remove_file_if_exists(&runtime.disabled_ini_path(&name))?;
            runtime.manifest().set_enabled(&name, true)?;
            tracing::info!("enabled {} for PHP {}", name, runtime.version());

            Ok(ManifestEntry {
                enabled: true,
                ..entry
            })
        })
    }

    /// Stop loading `name` without uninstalling it.
    ///
    /// The ini file is kept as `<name>.ini.disabled` so settings survive.
    pub fn disable(&self, runtime: &TargetRuntime, name: &str) -> Result<ManifestEntry> {
        let name = normalize_name(name);
        with_path_lock("runtime", &runtime.lock_key(), || {
            let entry = installed(runtime, &name)?;

            let ini = runtime.ini_path(&name);
            if ini.exists() {
                let disabled = runtime.disabled_ini_path(&name);
                std::fs::rename(&ini, &disabled).with_context(|| {
                    format!("failed to rename {} to {}", ini.display(), disabled.display())
                })?;
            }
            runtime.manifest().set_enabled(&name, false)?;
            tracing::info!("disabled {} for PHP {}", name, runtime.version());

            Ok(ManifestEntry {
                enabled: false,
                ..entry
            })
        })
    }

    /// Uninstall `name`: drop its manifest entry, ini files and module.
    pub fn remove(&self, runtime: &TargetRuntime, name: &str) -> Result<ManifestEntry> {
        let name = normalize_name(name);
        with_path_lock("runtime", &runtime.lock_key(), || {
            let Some(entry) = runtime.manifest().remove(&name)? else {
                bail!("{} is not installed for PHP {}", name, runtime.version());
            };

            remove_file_if_exists(&runtime.ini_path(&name))?;
            remove_file_if_exists(&runtime.disabled_ini_path(&name))?;
            remove_file_if_exists(&entry.artifact)?;
            tracing::info!("removed {} {} from PHP {}", entry.name, entry.version, runtime.version());
            Ok(entry)
        })
    }
}

fn installed(runtime: &TargetRuntime, name: &str) -> Result<ManifestEntry> {
    match runtime.manifest().get(name)? {
        Some(entry) => Ok(entry),
        None => bail!("{} is not installed for PHP {}", name, runtime.version()),
    }
}
