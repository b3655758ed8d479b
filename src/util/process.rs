//! Subprocess execution utilities.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::util::cancel::CancelToken;

/// How often a running child is polled for exit, timeout and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builder for subprocess execution.
///
/// Building a command and running it are separate steps, so build plans can
/// be inspected (and tested) without spawning anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
}

/// Limits applied while a child process runs.
#[derive(Debug, Clone, Default)]
pub struct ExecLimits {
    /// Kill the child after this long.
    pub timeout: Option<Duration>,
    /// Kill the child once this token is cancelled.
    pub cancel: CancelToken,
}

/// Captured result of a finished (or killed) child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was killed by a signal or by us.
    pub code: Option<i32>,
    /// Interleaved stdout and stderr, in arrival order per line.
    pub output: String,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.timed_out && !self.cancelled
    }
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the environment overrides.
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Get the working directory.
    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Build the Command.
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }

    /// Run to completion, capturing combined output.
    ///
    /// A nonzero exit is not an error here; callers inspect the returned
    /// [`ProcessOutput`]. Only failing to spawn or wait is an error.
    pub fn exec_limited(&self, limits: &ExecLimits) -> Result<ProcessOutput> {
        let start = Instant::now();
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("running `{}`", self.display_command());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))?;

        let combined = Arc::new(Mutex::new(String::new()));
        let readers = [
            child.stdout.take().map(|s| pump(s, Arc::clone(&combined))),
            child.stderr.take().map(|s| pump(s, Arc::clone(&combined))),
        ];

        let (code, timed_out, cancelled) = wait_with_limits(&mut child, limits, start)
            .with_context(|| format!("failed to wait for `{}`", self.program.display()))?;

        // A killed child's own children may still hold the pipes open, so the
        // readers are only joined after a normal exit.
        if !timed_out && !cancelled {
            for reader in readers.into_iter().flatten() {
                let _ = reader.join();
            }
        }

        let output = combined
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();

        Ok(ProcessOutput {
            code,
            output,
            timed_out,
            cancelled,
            elapsed: start.elapsed(),
        })
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

fn wait_with_limits(
    child: &mut Child,
    limits: &ExecLimits,
    start: Instant,
) -> std::io::Result<(Option<i32>, bool, bool)> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code(), false, false));
        }

        let timed_out = limits.timeout.is_some_and(|t| start.elapsed() >= t);
        let cancelled = limits.cancel.is_cancelled();
        if timed_out || cancelled {
            let _ = child.kill();
            let _ = child.wait();
            return Ok((None, timed_out, cancelled));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn pump<R: Read + Send + 'static>(
    stream: R,
    sink: Arc<Mutex<String>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.split(b'\n').map_while(|l| l.ok()) {
            if let Ok(mut buf) = sink.lock() {
                buf.push_str(&String::from_utf8_lossy(&line));
                buf.push('\n');
            }
        }
    })
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=./:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Find a make implementation, honoring `MAKE`.
pub fn find_make() -> Option<PathBuf> {
    if let Ok(make) = std::env::var("MAKE") {
        if let Some(path) = find_executable(&make) {
            return Some(path);
        }
    }

    ["make", "gmake"].iter().find_map(|m| find_executable(m))
}
