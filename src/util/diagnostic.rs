//! User-friendly diagnostic messages.
//!
//! A failed install must tell the user which stage broke, what ran, where it
//! ran, and how to run it again by hand.

use std::fmt;
use std::path::PathBuf;

/// Common suggestion messages for consistent error handling.
pub mod suggestions {
    pub const FETCH_FAILED: &str =
        "Check your network connection and retry; downloads are cached once complete";

    pub const INTEGRITY_FAILED: &str =
        "Verify the expected checksum; the downloaded archive was discarded";

    pub const NO_RUNTIME: &str =
        "Set `runtimes.active` in ~/.extbrew/config.toml or pass `--runtime <version>`";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with optional context and suggestions.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    pub context: Vec<String>,
    pub suggestions: Vec<String>,
    /// Related location (log file, build directory)
    pub location: Option<PathBuf>,
    /// Trailing captured output, printed verbatim
    pub excerpt: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            message: message.into(),
            severity: Severity::Error,
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
            excerpt: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            ..Diagnostic::error(message)
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Attach the last `max_lines` lines of `output`.
    pub fn with_excerpt(mut self, output: &str, max_lines: usize) -> Self {
        let lines: Vec<&str> = output.lines().collect();
        if lines.is_empty() {
            return self;
        }
        let start = lines.len().saturating_sub(max_lines);
        self.excerpt = Some(lines[start..].join("\n"));
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let severity_str = match (color, self.severity) {
            (true, Severity::Error) => "\x1b[1;31merror\x1b[0m".to_string(),
            (true, Severity::Warning) => "\x1b[1;33mwarning\x1b[0m".to_string(),
            (true, Severity::Note) => "\x1b[1;36mnote\x1b[0m".to_string(),
            (false, s) => s.to_string(),
        };

        let mut output = format!("{}: {}\n", severity_str, self.message);

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  = {}\n", ctx));
        }

        if let Some(ref excerpt) = self.excerpt {
            output.push('\n');
            for line in excerpt.lines() {
                output.push_str(&format!("  | {}\n", line));
            }
        }

        if !self.suggestions.is_empty() {
            output.push('\n');
            let help_prefix = if color { "\x1b[1;32mhelp\x1b[0m" } else { "help" };
            for suggestion in &self.suggestions {
                output.push_str(&format!("{}: {}\n", help_prefix, suggestion));
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}
