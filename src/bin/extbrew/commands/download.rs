//! `extbrew download` command
//!
//! Fetches and unpacks sources without building them. The extracted
//! directory is printed on stdout.

use anyhow::Result;
use serde_json::json;

use super::{provider_spec, version_token};
use crate::cli::DownloadArgs;
use crate::GlobalOptions;
use extbrew::ops::{ExtensionManager, InstallOptions};
use extbrew::util::shell::Status;
use extbrew::util::InstallContext;

pub fn execute(args: DownloadArgs, global: &GlobalOptions) -> Result<()> {
    let shell = &global.shell;
    let gctx = global.context()?;
    let manager = ExtensionManager::from_context(&gctx)?;

    // A runtime is optional here; it is only needed for bundled extensions
    let runtime = gctx.active_runtime().ok();

    let options = InstallOptions {
        version: version_token(args.version.as_deref()),
        provider: provider_spec(args.provider.as_deref())?,
        sha256: args.sha256,
        ..InstallOptions::default()
    };

    let ctx = InstallContext::new(shell.clone());
    let source = manager.fetch_source(&args.name, runtime.as_ref(), &options, &ctx)?;

    shell.status(
        Status::Fresh,
        format!(
            "{} {} ({})",
            source.locator.package, source.locator.version, source.locator.provider
        ),
    );
    if shell.is_json() {
        shell.json_event(&json!({
            "reason": "downloaded",
            "package": source.locator.package,
            "version": source.locator.version,
            "provider": source.locator.provider,
            "path": source.source_dir,
            "sha256": source.archive_sha256,
            "cache_hit": source.cache_hit,
        }));
    } else {
        println!("{}", source.source_dir.display());
    }
    Ok(())
}
