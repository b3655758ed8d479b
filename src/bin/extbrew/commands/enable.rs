//! `extbrew enable` and `extbrew disable` commands

use anyhow::Result;
use serde_json::json;

use super::active_runtime;
use crate::cli::NameArgs;
use crate::GlobalOptions;
use extbrew::ops::ExtensionManager;
use extbrew::util::shell::Status;

pub fn execute(args: NameArgs, global: &GlobalOptions) -> Result<()> {
    toggle(args, global, true)
}

pub fn execute_disable(args: NameArgs, global: &GlobalOptions) -> Result<()> {
    toggle(args, global, false)
}

fn toggle(args: NameArgs, global: &GlobalOptions, enable: bool) -> Result<()> {
    let shell = &global.shell;
    let gctx = global.context()?;
    let runtime = active_runtime(&gctx)?;
    let manager = ExtensionManager::from_context(&gctx)?;

    let entry = if enable {
        manager.enable(&runtime, &args.name)?
    } else {
        manager.disable(&runtime, &args.name)?
    };

    let (status, reason) = if enable {
        (Status::Enabled, "enabled")
    } else {
        (Status::Disabled, "disabled")
    };
    shell.status(status, format!("{} for PHP {}", entry.name, runtime.version()));
    shell.json_event(&json!({
        "reason": reason,
        "runtime": runtime.version(),
        "extension": entry,
    }));
    Ok(())
}
