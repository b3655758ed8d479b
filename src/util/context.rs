//! Global context for extbrew operations.
//!
//! Provides centralized access to configuration, paths, and environment.
//! [`GlobalContext`] is built once per process by the CLI; [`InstallContext`]
//! is the small per-operation value carrying cancellation and the output
//! sink through the call chain.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use directories::BaseDirs;

use crate::core::{RuntimeVersion, TargetRuntime};
use crate::util::cancel::CancelToken;
use crate::util::config::{load_config, Config};
use crate::util::shell::Shell;

/// Environment variable naming the active runtime, set by the runtime switcher.
pub const RUNTIME_ENV: &str = "EXTBREW_RUNTIME";

/// Environment variable overriding the extbrew home directory.
pub const HOME_ENV: &str = "EXTBREW_HOME";

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Home directory for global extbrew data (~/.extbrew/)
    home: PathBuf,

    /// Merged global and project configuration
    config: Config,

    /// Runtime chosen on the command line
    runtime_override: Option<String>,
}

impl GlobalContext {
    /// Create a new GlobalContext from the environment.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;

        let home = match std::env::var_os(HOME_ENV) {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".extbrew"))
                .unwrap_or_else(|| PathBuf::from(".extbrew")),
        };

        Ok(Self::with_paths(cwd, home))
    }

    /// Create a GlobalContext rooted at explicit directories.
    pub fn with_paths(cwd: PathBuf, home: PathBuf) -> Self {
        let config = load_config(
            &home.join("config.toml"),
            &cwd.join(".extbrew").join("config.toml"),
        );
        GlobalContext {
            cwd,
            home,
            config,
            runtime_override: None,
        }
    }

    /// Select the runtime explicitly, ignoring the environment and config.
    pub fn set_runtime(&mut self, version: Option<String>) {
        self.runtime_override = version.filter(|v| !v.trim().is_empty());
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the extbrew home directory (~/.extbrew/).
    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Downloaded archives.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Working directories for builds.
    pub fn build_dir(&self) -> PathBuf {
        self.home.join("build")
    }

    /// Get the global configuration file path.
    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// Directory holding `php-<version>` runtime prefixes.
    pub fn runtimes_root(&self) -> PathBuf {
        self.config
            .runtimes
            .root
            .clone()
            .unwrap_or_else(|| self.home.join("php"))
    }

    /// The active runtime version.
    ///
    /// Order of precedence: `--runtime`, `EXTBREW_RUNTIME`, `runtimes.active`.
    pub fn active_runtime_version(&self) -> Result<RuntimeVersion> {
        let env = std::env::var(RUNTIME_ENV).ok().filter(|v| !v.trim().is_empty());
        let Some(label) = self
            .runtime_override
            .clone()
            .or(env)
            .or_else(|| self.config.runtimes.active.clone())
        else {
            bail!(
                "no active runtime; pass --runtime, set {} or configure runtimes.active",
                RUNTIME_ENV
            );
        };
        RuntimeVersion::parse(&label).map_err(anyhow::Error::msg)
    }

    /// Install prefix of a runtime version.
    pub fn runtime_prefix(&self, version: &RuntimeVersion) -> PathBuf {
        match self.config.runtimes.paths.get(version.label()) {
            Some(path) => path.clone(),
            None => self
                .runtimes_root()
                .join(format!("php-{}", version.label())),
        }
    }

    /// Describe an installed runtime.
    ///
    /// A `src/` directory inside the prefix is taken as the runtime's source
    /// tree, for bundled extensions.
    pub fn runtime(&self, version: &RuntimeVersion) -> Result<TargetRuntime> {
        let prefix = self.runtime_prefix(version);
        if !prefix.is_dir() {
            bail!(
                "runtime {} is not installed (expected it at {})",
                version,
                prefix.display()
            );
        }

        let mut runtime = TargetRuntime::from_prefix(version.clone(), &prefix).detect_extension_dir();
        let source = prefix.join("src");
        if source.is_dir() {
            runtime = runtime.with_source_dir(source);
        }
        Ok(runtime)
    }

    /// The runtime selected by flags, environment or config.
    pub fn active_runtime(&self) -> Result<TargetRuntime> {
        let version = self.active_runtime_version()?;
        self.runtime(&version)
    }
}

/// Per-operation context: cancellation and the output sink.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub cancel: CancelToken,
    pub shell: Arc<Shell>,
}

impl InstallContext {
    pub fn new(shell: Arc<Shell>) -> Self {
        InstallContext {
            cancel: CancelToken::new(),
            shell,
        }
    }

    /// A context that prints nothing.
    pub fn quiet() -> Self {
        Self::new(Shell::quiet())
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
