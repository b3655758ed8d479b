//! `extbrew cache` command

use anyhow::Result;
use serde_json::json;

use crate::cli::{CacheArgs, CacheCleanArgs, CacheCommands};
use crate::GlobalOptions;
use extbrew::sources::ArtifactCache;
use extbrew::util::fs::remove_dir_all_if_exists;
use extbrew::util::shell::Status;
use extbrew::util::GlobalContext;

pub fn execute(args: CacheArgs, global: &GlobalOptions) -> Result<()> {
    let gctx = global.context()?;

    match args.command {
        CacheCommands::Path => {
            println!("{}", gctx.cache_dir().display());
            Ok(())
        }
        CacheCommands::List => list(&gctx, global),
        CacheCommands::Clean(clean_args) => clean(&gctx, clean_args, global),
    }
}

fn list(gctx: &GlobalContext, global: &GlobalOptions) -> Result<()> {
    let shell = &global.shell;
    let cache = ArtifactCache::new(gctx.cache_dir());
    let entries = cache.entries()?;

    if shell.is_json() {
        let entries: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "key": e.key,
                    "url": e.meta.url,
                    "sha256": e.meta.sha256,
                    "size": e.size,
                })
            })
            .collect();
        shell.json_event(&json!({ "reason": "cache-list", "entries": entries }));
        return Ok(());
    }

    if entries.is_empty() {
        shell.note("cache is empty");
        return Ok(());
    }

    let mut total = 0;
    for entry in &entries {
        total += entry.size;
        println!(
            "{}  {}  {}",
            entry.key.display(),
            format_size(entry.size),
            entry.meta.url
        );
    }
    println!();
    println!("{} entries, {}", entries.len(), format_size(total));
    Ok(())
}

fn clean(gctx: &GlobalContext, args: CacheCleanArgs, global: &GlobalOptions) -> Result<()> {
    let shell = &global.shell;
    let freed = ArtifactCache::new(gctx.cache_dir()).clean()?;
    shell.status(Status::Removed, format!("{} of cached archives", format_size(freed)));

    if args.builds {
        let build_dir = gctx.build_dir();
        if build_dir.exists() {
            remove_dir_all_if_exists(&build_dir)?;
            shell.status(Status::Removed, format!("build directories in {}", build_dir.display()));
        }
    }

    shell.json_event(&json!({
        "reason": "cache-clean",
        "freed": freed,
        "builds": args.builds,
    }));
    Ok(())
}

/// Format a size in bytes to a human-readable string.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
