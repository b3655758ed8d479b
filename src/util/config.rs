//! Configuration file support for extbrew.
//!
//! Two locations are read:
//! - Global: `~/.extbrew/config.toml` - user-wide defaults
//! - Project: `.extbrew/config.toml` - overrides for the current directory
//!
//! Project config takes precedence over global config, field by field.
//!
//! ```toml
//! recipes = ["/etc/extbrew/recipes.toml"]
//!
//! [fetch]
//! retries = 3
//! backoff_ms = 500
//! timeout_secs = 120
//!
//! [build]
//! jobs = 8
//! configure_timeout_secs = 600
//! build_timeout_secs = 1800
//!
//! [providers]
//! default = "pecl"
//! pecl_url = "https://pecl.php.net"
//!
//! [runtimes]
//! active = "8.1"
//! root = "/opt/php"
//!
//! [runtimes.paths]
//! "8.3" = "/usr/local/php-8.3"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::sources::download::RetryPolicy;

pub const DEFAULT_PECL_URL: &str = "https://pecl.php.net";

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 500;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONFIGURE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 1800;

/// extbrew configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Extra recipe files merged into the built-in table
    pub recipes: Vec<PathBuf>,

    pub fetch: FetchConfig,

    pub build: BuildConfig,

    pub providers: ProvidersConfig,

    pub runtimes: RuntimesConfig,
}

/// Download settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Total attempts per download, including the first
    pub retries: Option<u32>,

    /// Delay before the first retry; doubles after each attempt
    pub backoff_ms: Option<u64>,

    /// Per-request network timeout
    pub timeout_secs: Option<u64>,
}

/// Build settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Parallel make jobs (None = number of CPUs)
    pub jobs: Option<usize>,

    pub configure_timeout_secs: Option<u64>,

    pub build_timeout_secs: Option<u64>,

    /// Keep the working directory after a successful install
    pub keep_build_dir: bool,
}

/// Provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider used when neither the request nor a recipe names one
    pub default: Option<String>,

    /// PECL mirror base URL
    pub pecl_url: Option<String>,
}

/// Where installed runtimes live and which one is active.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimesConfig {
    /// Active runtime version, overridden by `EXTBREW_RUNTIME`
    pub active: Option<String>,

    /// Directory holding `php-<version>` prefixes
    pub root: Option<PathBuf>,

    /// Explicit prefixes for individual versions
    pub paths: BTreeMap<String, PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file is missing or broken.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        // Recipe files accumulate; later files override earlier recipes by name.
        self.recipes.extend(other.recipes);

        if other.fetch.retries.is_some() {
            self.fetch.retries = other.fetch.retries;
        }
        if other.fetch.backoff_ms.is_some() {
            self.fetch.backoff_ms = other.fetch.backoff_ms;
        }
        if other.fetch.timeout_secs.is_some() {
            self.fetch.timeout_secs = other.fetch.timeout_secs;
        }

        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if other.build.configure_timeout_secs.is_some() {
            self.build.configure_timeout_secs = other.build.configure_timeout_secs;
        }
        if other.build.build_timeout_secs.is_some() {
            self.build.build_timeout_secs = other.build.build_timeout_secs;
        }
        if other.build.keep_build_dir {
            self.build.keep_build_dir = true;
        }

        if other.providers.default.is_some() {
            self.providers.default = other.providers.default;
        }
        if other.providers.pecl_url.is_some() {
            self.providers.pecl_url = other.providers.pecl_url;
        }

        if other.runtimes.active.is_some() {
            self.runtimes.active = other.runtimes.active;
        }
        if other.runtimes.root.is_some() {
            self.runtimes.root = other.runtimes.root;
        }
        self.runtimes.paths.extend(other.runtimes.paths);
    }

    /// Download retry policy, with defaults filled in.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.retries.unwrap_or(DEFAULT_RETRIES).max(1),
            initial_backoff: Duration::from_millis(
                self.fetch.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS),
            ),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS))
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_secs(
            self.build
                .configure_timeout_secs
                .unwrap_or(DEFAULT_CONFIGURE_TIMEOUT_SECS),
        )
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(
            self.build
                .build_timeout_secs
                .unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS),
        )
    }

    pub fn jobs(&self) -> usize {
        self.build.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn pecl_url(&self) -> &str {
        self.providers.pecl_url.as_deref().unwrap_or(DEFAULT_PECL_URL)
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.extbrew/config.toml)
/// 2. Global config (~/.extbrew/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        config.merge(Config::load_or_default(global_path));
    }

    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }

    config
}
