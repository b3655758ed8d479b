//! `extbrew list` command

use anyhow::Result;
use serde_json::json;

use super::active_runtime;
use crate::GlobalOptions;
use extbrew::ops::ExtensionManager;

pub fn execute(global: &GlobalOptions) -> Result<()> {
    let shell = &global.shell;
    let gctx = global.context()?;
    let runtime = active_runtime(&gctx)?;
    let manager = ExtensionManager::from_context(&gctx)?;

    let entries = manager.list(&runtime)?;

    if shell.is_json() {
        shell.json_event(&json!({
            "reason": "list",
            "runtime": runtime.version(),
            "extensions": entries,
        }));
        return Ok(());
    }

    if entries.is_empty() {
        shell.note(format!("no extensions installed for PHP {}", runtime.version()));
        return Ok(());
    }

    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entry in &entries {
        let mut flags = Vec::new();
        if entry.zend {
            flags.push("zend");
        }
        if !entry.enabled {
            flags.push("disabled");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "{:<width$} {} ({}){}",
            entry.name,
            entry.version,
            entry.provider,
            flags,
            width = width
        );
    }

    Ok(())
}
