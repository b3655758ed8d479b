//! Outcomes of an install.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::builder::Stage;
use crate::core::{ProviderId, RuntimeVersion};
use crate::sources::{FetchError, ProviderError};
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::process::ProcessOutput;

/// Lines of captured output shown in a failure diagnostic.
const EXCERPT_LINES: usize = 20;

/// A subprocess stage that exited nonzero, timed out or was killed.
#[derive(Debug, Clone)]
pub struct StageFailure {
    /// The command line as it was run
    pub command: String,
    pub cwd: PathBuf,
    pub code: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
    pub timed_out: bool,
    /// Full build log, if one was written
    pub log: Option<PathBuf>,
}

impl StageFailure {
    pub fn from_output(command: String, cwd: PathBuf, out: &ProcessOutput) -> Self {
        StageFailure {
            command,
            cwd,
            code: out.code,
            output: out.output.clone(),
            timed_out: out.timed_out,
            log: None,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            _ if self.timed_out => write!(f, "`{}` timed out", self.command),
            Some(code) => write!(f, "`{}` exited with code {}", self.command, code),
            None => write!(f, "`{}` was killed", self.command),
        }
    }
}

/// Why an install failed.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Incompatible(String),

    #[error("configure failed: {0}")]
    Configure(StageFailure),

    #[error("build failed: {0}")]
    Build(StageFailure),

    #[error("install failed: {0:#}")]
    Install(anyhow::Error),

    #[error("install cancelled")]
    Cancelled,
}

/// Flat classification of [`InstallError`] for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    UpstreamUnavailable,
    InvalidRequest,
    Integrity,
    Extract,
    Io,
    Incompatible,
    Configure,
    Build,
    Install,
    Cancelled,
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Fetch(e) => match e {
                FetchError::Provider(ProviderError::NotFound { .. }) => ErrorKind::NotFound,
                FetchError::Provider(ProviderError::UpstreamUnavailable { .. }) => {
                    ErrorKind::UpstreamUnavailable
                }
                FetchError::Provider(ProviderError::Invalid { .. }) => ErrorKind::InvalidRequest,
                FetchError::Integrity { .. } => ErrorKind::Integrity,
                FetchError::Extract { .. } => ErrorKind::Extract,
                FetchError::Cancelled => ErrorKind::Cancelled,
                FetchError::Io(_) => ErrorKind::Io,
            },
            InstallError::Incompatible(_) => ErrorKind::Incompatible,
            InstallError::Configure(_) => ErrorKind::Configure,
            InstallError::Build(_) => ErrorKind::Build,
            InstallError::Install(_) => ErrorKind::Install,
            InstallError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The failed subprocess, for configure and build errors.
    pub fn stage_failure(&self) -> Option<&StageFailure> {
        match self {
            InstallError::Configure(f) | InstallError::Build(f) => Some(f),
            _ => None,
        }
    }
}

/// A successfully installed extension.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledExtension {
    pub name: String,
    pub version: String,
    pub provider: ProviderId,
    pub runtime: RuntimeVersion,
    /// Module inside the runtime's extension directory
    pub artifact: PathBuf,
    pub sha256: String,
    pub ini: PathBuf,
    pub zend: bool,
    /// Whether an existing manifest entry was replaced
    pub replaced: bool,
    /// Archive came from the cache
    pub cache_hit: bool,
    /// Working directory, when kept on request
    pub build_dir: Option<PathBuf>,
}

/// A failed install with enough context to act on.
#[derive(Debug)]
pub struct InstallFailure {
    pub extension: String,
    pub runtime: RuntimeVersion,
    pub stage: Stage,
    pub error: InstallError,
    /// Working directory left for inspection
    pub build_dir: Option<PathBuf>,
}

impl InstallFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Render the failure for the terminal.
    pub fn diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::error(format!(
            "failed to install {} for PHP {} at stage {}",
            self.extension, self.runtime, self.stage
        ))
        .with_context(self.error.to_string());

        if let Some(failure) = self.error.stage_failure() {
            diag = diag
                .with_context(format!("command: {}", failure.command))
                .with_context(format!("in: {}", failure.cwd.display()))
                .with_excerpt(&failure.output, EXCERPT_LINES);
            if let Some(log) = &failure.log {
                diag = diag.with_location(log);
            }
        } else if let Some(dir) = &self.build_dir {
            diag = diag.with_location(dir);
        }

        match self.kind() {
            ErrorKind::Integrity => diag.with_suggestion(suggestions::INTEGRITY_FAILED),
            ErrorKind::UpstreamUnavailable => diag.with_suggestion(suggestions::FETCH_FAILED),
            ErrorKind::Configure | ErrorKind::Build => match self.error.stage_failure() {
                Some(failure) => diag.with_suggestion(format!(
                    "Re-run by hand with `cd {} && {}`",
                    failure.cwd.display(),
                    failure.command
                )),
                None => diag,
            },
            _ => diag,
        }
    }
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (PHP {}) failed at {}: {}",
            self.extension, self.runtime, self.stage, self.error
        )
    }
}

/// What `install_extension` returns.
#[derive(Debug)]
pub enum InstallResult {
    Installed(InstalledExtension),
    Failed(InstallFailure),
}

impl InstallResult {
    pub fn is_installed(&self) -> bool {
        matches!(self, InstallResult::Installed(_))
    }

    pub fn installed(&self) -> Option<&InstalledExtension> {
        match self {
            InstallResult::Installed(ext) => Some(ext),
            InstallResult::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&InstallFailure> {
        match self {
            InstallResult::Installed(_) => None,
            InstallResult::Failed(f) => Some(f),
        }
    }
}
