//! `extbrew install` command

use anyhow::{bail, Result};
use serde_json::json;

use super::{active_runtime, provider_spec, version_token};
use crate::cli::InstallArgs;
use crate::GlobalOptions;
use extbrew::ops::{ExtensionManager, InstallOptions, InstallResult};
use extbrew::util::InstallContext;

pub fn execute(args: InstallArgs, global: &GlobalOptions) -> Result<()> {
    let shell = &global.shell;
    let gctx = global.context()?;
    let runtime = active_runtime(&gctx)?;
    let manager = ExtensionManager::from_context(&gctx)?;

    let options = InstallOptions {
        version: version_token(args.version.as_deref()),
        provider: provider_spec(args.provider.as_deref())?,
        configure_flags: args.configure_flags,
        sha256: args.sha256,
        // CLI flag OR config setting
        keep_build_dir: args.keep_build_dir || gctx.config().build.keep_build_dir,
        jobs: args.jobs,
    };

    let ctx = InstallContext::new(shell.clone());
    match manager.install_extension(&args.name, &runtime, &options, &ctx) {
        InstallResult::Installed(installed) => {
            shell.json_event(&json!({
                "reason": "installed",
                "extension": installed,
            }));
            if let Some(dir) = &installed.build_dir {
                shell.note(format!("build directory kept at {}", dir.display()));
            }
            Ok(())
        }
        InstallResult::Failed(failure) => {
            if shell.is_json() {
                shell.json_event(&json!({
                    "reason": "install-failed",
                    "extension": failure.extension,
                    "runtime": failure.runtime,
                    "stage": failure.stage,
                    "kind": failure.kind(),
                    "message": failure.error.to_string(),
                    "build_dir": failure.build_dir,
                }));
            } else {
                eprint!("{}", failure.diagnostic().format(shell.use_color()));
            }
            bail!("could not install {}", failure.extension)
        }
    }
}
