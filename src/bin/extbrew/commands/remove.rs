//! `extbrew remove` command

use anyhow::Result;
use serde_json::json;

use super::active_runtime;
use crate::cli::NameArgs;
use crate::GlobalOptions;
use extbrew::ops::ExtensionManager;
use extbrew::util::shell::Status;

pub fn execute(args: NameArgs, global: &GlobalOptions) -> Result<()> {
    let shell = &global.shell;
    let gctx = global.context()?;
    let runtime = active_runtime(&gctx)?;
    let manager = ExtensionManager::from_context(&gctx)?;

    let entry = manager.remove(&runtime, &args.name)?;

    shell.status(
        Status::Removed,
        format!("{} {} from PHP {}", entry.name, entry.version, runtime.version()),
    );
    shell.json_event(&json!({
        "reason": "removed",
        "runtime": runtime.version(),
        "extension": entry,
    }));
    Ok(())
}
