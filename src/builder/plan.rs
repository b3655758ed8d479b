//! Build plan generation.
//!
//! A BuildPlan lists the commands that turn extracted extension sources into
//! a loadable module: recipe hooks, `phpize`, `./configure` and `make`.
//! Planning never runs anything; see [`crate::builder::runner`] for that.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::{ExtensionRecipe, HookPoint, TargetRuntime};
use crate::ops::InstallOptions;
use crate::util::process::{find_make, ProcessBuilder};

/// Pipeline stage an install is in (or failed at).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolve,
    Fetch,
    Configure,
    Build,
    Install,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Configure => "configure",
            Stage::Build => "build",
            Stage::Install => "install",
        };
        f.write_str(name)
    }
}

/// One command in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub stage: Stage,
    /// Short name for status output (`phpize`, `configure`, `make`)
    pub label: String,
    pub command: ProcessBuilder,
}

/// Ordered build commands for one extension.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub steps: Vec<BuildStep>,

    /// Flags passed to `./configure` after merging recipe and user flags
    pub configure_flags: Vec<String>,

    /// Where `make` leaves the module
    pub artifact: PathBuf,

    pub source_dir: PathBuf,
}

impl BuildPlan {
    /// Plan the build of `recipe` in `source_dir` against `runtime`.
    pub fn new(
        recipe: &ExtensionRecipe,
        runtime: &TargetRuntime,
        options: &InstallOptions,
        source_dir: &Path,
    ) -> Self {
        let configure_flags = merge_flags(&recipe.configure_flags, &options.configure_flags);
        let cflags = recipe.cflags.join(" ");
        let with_env = |cmd: ProcessBuilder| {
            if cflags.is_empty() {
                cmd
            } else {
                cmd.env("CFLAGS", &cflags)
            }
        };

        let mut steps = Vec::new();

        for hook in recipe.hooks_at(HookPoint::PreConfigure) {
            steps.push(BuildStep {
                stage: Stage::Configure,
                label: hook.program.clone(),
                command: ProcessBuilder::new(&hook.program)
                    .args(&hook.args)
                    .cwd(source_dir),
            });
        }

        if recipe.phpize {
            steps.push(BuildStep {
                stage: Stage::Configure,
                label: "phpize".into(),
                command: ProcessBuilder::new(runtime.phpize()).cwd(source_dir),
            });
        }

        let php_config = runtime.php_config();
        steps.push(BuildStep {
            stage: Stage::Configure,
            label: "configure".into(),
            command: with_env(
                ProcessBuilder::new(source_dir.join("configure"))
                    .arg(format!("--with-php-config={}", php_config.display()))
                    .args(&configure_flags)
                    .cwd(source_dir),
            ),
        });

        let make = find_make().unwrap_or_else(|| PathBuf::from("make"));
        let jobs = options.jobs.unwrap_or(1).max(1);
        steps.push(BuildStep {
            stage: Stage::Build,
            label: "make".into(),
            command: with_env(
                ProcessBuilder::new(make)
                    .arg(format!("-j{}", jobs))
                    .cwd(source_dir),
            ),
        });

        for hook in recipe.hooks_at(HookPoint::PostBuild) {
            steps.push(BuildStep {
                stage: Stage::Build,
                label: hook.program.clone(),
                command: ProcessBuilder::new(&hook.program)
                    .args(&hook.args)
                    .cwd(source_dir),
            });
        }

        BuildPlan {
            steps,
            configure_flags,
            artifact: source_dir
                .join("modules")
                .join(format!("{}.so", recipe.artifact_stem())),
            source_dir: source_dir.to_path_buf(),
        }
    }

    /// Steps belonging to `stage`, in order.
    pub fn steps_for(&self, stage: Stage) -> impl Iterator<Item = &BuildStep> {
        self.steps.iter().filter(move |s| s.stage == stage)
    }
}

/// Feature a configure flag toggles.
///
/// `--enable-foo`, `--disable-foo`, `--with-foo=/x` and `--without-foo`
/// all share the key `foo`. Other flags (`--prefix=...`) key on their name.
pub fn flag_key(flag: &str) -> String {
    let name = flag.split_once('=').map_or(flag, |(name, _)| name);
    let bare = name.trim_start_matches('-');
    for prefix in ["enable-", "disable-", "without-", "with-"] {
        if let Some(feature) = bare.strip_prefix(prefix) {
            return feature.to_string();
        }
    }
    bare.to_string()
}

/// Merge user flags over recipe flags.
///
/// A user flag replaces the recipe flag with the same key where it stands;
/// flags with new keys are appended in the order given.
pub fn merge_flags(recipe: &[String], overrides: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = recipe.to_vec();
    for flag in overrides {
        let key = flag_key(flag);
        match merged.iter().position(|f| flag_key(f) == key) {
            Some(idx) => merged[idx] = flag.clone(),
            None => merged.push(flag.clone()),
        }
    }
    merged
}
