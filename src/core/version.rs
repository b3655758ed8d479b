//! Version tokens and runtime versions.

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// What the user asked for when naming an extension version.
///
/// Each provider interprets tokens in its own way: PECL reads the matching
/// release channel, git providers pick tags, local providers mostly ignore
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionToken {
    /// Newest release on any channel.
    Latest,
    /// Newest stable release.
    Stable,
    /// Newest release on a named PECL channel (`beta`, `alpha`, `devel`).
    Channel(String),
    /// A literal version, tag, branch or commit.
    Literal(String),
}

const CHANNELS: &[&str] = &["beta", "alpha", "devel", "snapshot"];

impl VersionToken {
    /// The literal string for literal tokens.
    pub fn literal(&self) -> Option<&str> {
        match self {
            VersionToken::Literal(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        !matches!(self, VersionToken::Literal(_))
    }

    /// Name of the release channel a symbolic token maps to.
    pub fn channel(&self) -> Option<&str> {
        match self {
            VersionToken::Latest => Some("latest"),
            VersionToken::Stable => Some("stable"),
            VersionToken::Channel(c) => Some(c),
            VersionToken::Literal(_) => None,
        }
    }
}

impl Default for VersionToken {
    fn default() -> Self {
        VersionToken::Stable
    }
}

impl FromStr for VersionToken {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        Ok(match lower.as_str() {
            "" | "stable" => VersionToken::Stable,
            "latest" => VersionToken::Latest,
            c if CHANNELS.contains(&c) => VersionToken::Channel(lower),
            _ => VersionToken::Literal(trimmed.to_string()),
        })
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::Latest => write!(f, "latest"),
            VersionToken::Stable => write!(f, "stable"),
            VersionToken::Channel(c) => write!(f, "{}", c),
            VersionToken::Literal(s) => write!(f, "{}", s),
        }
    }
}

/// Version of a target runtime, e.g. `8.1` or `8.1.27`.
///
/// Keeps the label the runtime is known by and a normalized semver version
/// for range checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuntimeVersion {
    label: String,
    version: Version,
}

impl RuntimeVersion {
    pub fn parse(s: &str) -> Result<Self, String> {
        let label = s.trim().trim_start_matches("php-").to_string();
        let version = parse_loose(&label)
            .ok_or_else(|| format!("invalid runtime version `{}`", s))?;
        Ok(RuntimeVersion { label, version })
    }

    /// The label as configured (`8.1`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Normalized semver version (`8.1.0`).
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Whether this runtime satisfies a compatibility range.
    ///
    /// Pre-release runtimes are compared by their release triple so that
    /// `8.4.0-RC1` satisfies `>=8.0`.
    pub fn satisfies(&self, req: &VersionReq) -> bool {
        let release = Version::new(self.version.major, self.version.minor, self.version.patch);
        req.matches(&release)
    }
}

impl FromStr for RuntimeVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuntimeVersion::parse(s)
    }
}

impl TryFrom<String> for RuntimeVersion {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RuntimeVersion::parse(&s)
    }
}

impl From<RuntimeVersion> for String {
    fn from(v: RuntimeVersion) -> Self {
        v.label
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Parse versions the way PHP projects write them.
///
/// Accepts a leading `v`, missing minor/patch components (`8`, `8.1`) and
/// PHP-style suffixes (`8.4.0RC1`, `3.3.0beta1`).
pub fn parse_loose(s: &str) -> Option<Version> {
    let s = s.trim().trim_start_matches(['v', 'V']);
    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (numeric, suffix) = s.split_at(split);
    let numeric = numeric.trim_end_matches('.');

    let mut parts = numeric.split('.');
    let major: u64 = parts.next()?.parse().ok()?;
    let minor: u64 = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch: u64 = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    if parts.next().is_some() {
        return None;
    }

    let mut version = Version::new(major, minor, patch);
    let suffix = suffix.trim_start_matches(['-', '_', '.']);
    if !suffix.is_empty() {
        version.pre = semver::Prerelease::new(&suffix.replace('_', ".")).ok()?;
    }
    Some(version)
}
