//! Test utilities and mocks for extbrew unit tests.
//!
//! This module provides stand-ins for the pieces of an install that touch
//! the outside world: the network transport, the git ref lister and the
//! build runner.
//!
//! # Example
//!
//! ```rust,ignore
//! use extbrew::test_support::{MockTransport, ScriptedRunner};
//!
//! #[test]
//! fn test_example() {
//!     let transport = MockTransport::new();
//!     transport.add_text("https://pecl.test/rest/r/apcu/stable.txt", "5.1.22");
//!
//!     let runner = ScriptedRunner::new();
//!     runner.fail_label("make", 2, "error: expected ';'");
//!
//!     // Hand both to an ExtensionManager...
//! }
//! ```

pub mod fixtures;

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{LazyLock, Mutex};

use anyhow::Result;
use regex::Regex;
use url::Url;

use crate::builder::{BuildStep, StepRunner};
use crate::sources::{RefLister, RemoteRef};
use crate::util::cancel::CancelToken;
use crate::util::http::{Transport, TransportError};
use crate::util::process::{ExecLimits, ProcessOutput};

// Re-export fixtures for convenience
pub use fixtures::*;

/// How a mocked URL fails.
#[derive(Debug, Clone, Copy)]
enum Failure {
    /// Fail this many more times, then serve normally.
    Times(usize),
    Always,
}

#[derive(Debug, Default)]
struct TransportState {
    texts: HashMap<String, String>,
    bodies: HashMap<String, Vec<u8>>,
    failures: HashMap<String, Failure>,
    text_counts: HashMap<String, usize>,
    fetch_counts: HashMap<String, usize>,
    requests: Vec<String>,
}

/// In-memory transport that records every request.
///
/// Unknown `http(s)` URLs are 404s. `file://` URLs that were not registered
/// are read from disk, like the real transport does.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<TransportState>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap()
    }

    /// Serve `text` from `url` via `get_text`.
    pub fn add_text(&self, url: &str, text: impl Into<String>) {
        self.state().texts.insert(url.to_string(), text.into());
    }

    /// Serve `body` from `url` via `fetch`.
    pub fn add_body(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.state().bodies.insert(url.to_string(), body.into());
    }

    /// Make the next `n` requests for `url` fail as unavailable.
    pub fn fail_times(&self, url: &str, n: usize) {
        self.state().failures.insert(url.to_string(), Failure::Times(n));
    }

    /// Make every request for `url` fail as unavailable.
    pub fn fail_with_unavailable(&self, url: &str) {
        self.state().failures.insert(url.to_string(), Failure::Always);
    }

    /// Number of `fetch` calls for `url`, failed ones included.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.state().fetch_counts.get(url).copied().unwrap_or(0)
    }

    /// Number of `get_text` calls for `url`, failed ones included.
    pub fn text_count(&self, url: &str) -> usize {
        self.state().text_counts.get(url).copied().unwrap_or(0)
    }

    /// Every URL requested, in order.
    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    /// Record a request and apply any scripted failure.
    fn begin(&self, url: &Url, fetch: bool) -> Result<(), TransportError> {
        let key = url.to_string();
        let mut state = self.state();
        state.requests.push(key.clone());
        let counts = if fetch {
            &mut state.fetch_counts
        } else {
            &mut state.text_counts
        };
        *counts.entry(key.clone()).or_insert(0) += 1;

        let fail = match state.failures.get_mut(&key) {
            Some(Failure::Always) => true,
            Some(Failure::Times(n)) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        };
        if fail {
            return Err(TransportError::Unavailable {
                url: key,
                message: "connection reset by peer".into(),
            });
        }
        Ok(())
    }

    fn read_file(url: &Url) -> Result<Vec<u8>, TransportError> {
        let not_found = || TransportError::NotFound {
            url: url.to_string(),
        };
        if url.scheme() != "file" {
            return Err(not_found());
        }
        let path = url.to_file_path().map_err(|_| not_found())?;
        std::fs::read(path).map_err(|_| not_found())
    }
}

impl Transport for MockTransport {
    fn get_text(&self, url: &Url) -> Result<String, TransportError> {
        self.begin(url, false)?;
        if let Some(text) = self.state().texts.get(url.as_str()) {
            return Ok(text.clone());
        }
        let bytes = Self::read_file(url)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn fetch(&self, url: &Url, sink: &mut dyn Write) -> Result<u64, TransportError> {
        self.begin(url, true)?;
        let body = self.state().bodies.get(url.as_str()).cloned();
        let body = match body {
            Some(body) => body,
            None => Self::read_file(url)?,
        };
        sink.write_all(&body)?;
        Ok(body.len() as u64)
    }
}

/// Ref lister answering from a fixed table.
#[derive(Debug, Clone)]
pub struct StaticRefs {
    refs: Option<Vec<RemoteRef>>,
}

impl StaticRefs {
    /// Serve `(name, oid)` pairs for every remote.
    pub fn new(refs: &[(&str, &str)]) -> Self {
        StaticRefs {
            refs: Some(
                refs.iter()
                    .map(|(name, oid)| RemoteRef {
                        name: name.to_string(),
                        oid: oid.to_string(),
                    })
                    .collect(),
            ),
        }
    }

    /// A remote that cannot be reached.
    pub fn unreachable() -> Self {
        StaticRefs { refs: None }
    }
}

impl RefLister for StaticRefs {
    fn list(&self, url: &str) -> Result<Vec<RemoteRef>, TransportError> {
        self.refs.clone().ok_or_else(|| TransportError::Unavailable {
            url: url.to_string(),
            message: "could not resolve host".into(),
        })
    }
}

static M4_EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"PHP_(?:ARG|NEW)_(?:ENABLE|WITH|EXTENSION)\(\s*\[?([A-Za-z0-9_]+)").unwrap()
});

#[derive(Debug, Default)]
struct RunnerState {
    steps: Vec<BuildStep>,
    failures: HashMap<String, (i32, String)>,
    cancel_on: Option<(String, CancelToken)>,
}

/// Build runner that pretends to run phpize, configure and make.
///
/// `make` leaves `modules/<name>.so` in the step's directory, with the name
/// taken from `config.m4`. Any step can be scripted to fail or to cancel the
/// install.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    state: Mutex<RunnerState>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        ScriptedRunner::default()
    }

    /// Make the step labelled `label` exit with `code`, printing `output`.
    pub fn fail_label(&self, label: &str, code: i32, output: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(label.to_string(), (code, output.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Cancel `token` while the step labelled `label` runs.
    pub fn cancel_on(&self, label: &str, token: CancelToken) {
        self.state.lock().unwrap().cancel_on = Some((label.to_string(), token));
    }

    /// Labels of all steps run so far.
    pub fn labels(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .steps
            .iter()
            .map(|s| s.label.clone())
            .collect()
    }

    /// The most recent step with `label`.
    pub fn step(&self, label: &str) -> Option<BuildStep> {
        self.state
            .lock()
            .unwrap()
            .steps
            .iter()
            .rev()
            .find(|s| s.label == label)
            .cloned()
    }

    fn fake_make(dir: &Path) -> Result<String> {
        let m4 = std::fs::read_to_string(dir.join("config.m4")).unwrap_or_default();
        let name = M4_EXTENSION
            .captures(&m4)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "extension".to_string());
        let modules = dir.join("modules");
        std::fs::create_dir_all(&modules)?;
        std::fs::write(modules.join(format!("{}.so", name)), format!("\x7fELF {}", name))?;
        Ok(name)
    }
}

impl StepRunner for ScriptedRunner {
    fn run(&self, step: &BuildStep, _limits: &ExecLimits) -> Result<ProcessOutput> {
        let (failure, cancel) = {
            let mut state = self.state.lock().unwrap();
            state.steps.push(step.clone());
            let cancel = state
                .cancel_on
                .as_ref()
                .filter(|(label, _)| *label == step.label)
                .map(|(_, token)| token.clone());
            (state.failures.get(&step.label).cloned(), cancel)
        };

        if let Some(token) = cancel {
            token.cancel();
            return Ok(ProcessOutput {
                cancelled: true,
                ..ProcessOutput::default()
            });
        }

        if let Some((code, output)) = failure {
            return Ok(ProcessOutput {
                code: Some(code),
                output,
                ..ProcessOutput::default()
            });
        }

        let mut output = format!("{} ok\n", step.label);
        if step.label == "make" {
            if let Some(dir) = step.command.get_cwd() {
                let name = Self::fake_make(dir)?;
                output.push_str(&format!("Build complete: modules/{}.so\n", name));
            }
        }
        Ok(ProcessOutput {
            code: Some(0),
            output,
            ..ProcessOutput::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Stage;
    use crate::util::process::ProcessBuilder;
    use tempfile::TempDir;

    #[test]
    fn test_mock_transport_counts_and_fails() {
        let transport = MockTransport::new();
        let url = Url::parse("https://pecl.test/get/APCu-5.1.22.tgz").unwrap();
        transport.add_body(url.as_str(), b"bytes".to_vec());
        transport.fail_times(url.as_str(), 1);

        let mut sink = Vec::new();
        assert!(transport.fetch(&url, &mut sink).is_err());
        assert_eq!(transport.fetch(&url, &mut sink).unwrap(), 5);
        assert_eq!(sink, b"bytes");
        assert_eq!(transport.fetch_count(url.as_str()), 2);

        let missing = Url::parse("https://pecl.test/nope").unwrap();
        assert!(matches!(
            transport.get_text(&missing),
            Err(TransportError::NotFound { .. })
        ));
    }

    #[test]
    fn test_scripted_make_creates_module() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("config.m4"), "PHP_ARG_ENABLE([apcu], [whether])").unwrap();
        let runner = ScriptedRunner::new();
        let step = BuildStep {
            stage: Stage::Build,
            label: "make".into(),
            command: ProcessBuilder::new("make").cwd(tmp.path()),
        };

        let out = runner.run(&step, &ExecLimits::default()).unwrap();
        assert!(out.success());
        assert!(tmp.path().join("modules/apcu.so").is_file());
        assert_eq!(runner.labels(), ["make"]);
    }
}
