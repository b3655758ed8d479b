//! Command implementations

pub mod cache;
pub mod completions;
pub mod download;
pub mod enable;
pub mod install;
pub mod list;
pub mod remove;

use anyhow::{anyhow, Result};

use extbrew::core::{ProviderSpec, TargetRuntime, VersionToken};
use extbrew::util::diagnostic::suggestions;
use extbrew::util::GlobalContext;

/// The runtime selected by `--runtime`, the environment or the config.
pub fn active_runtime(ctx: &GlobalContext) -> Result<TargetRuntime> {
    ctx.active_runtime()
        .map_err(|e| anyhow!("{:#}\n\nhelp: {}", e, suggestions::NO_RUNTIME))
}

/// A missing version means the stable channel.
pub fn version_token(version: Option<&str>) -> VersionToken {
    match version.map(str::parse::<VersionToken>) {
        Some(Ok(token)) => token,
        Some(Err(never)) => match never {},
        None => VersionToken::default(),
    }
}

pub fn provider_spec(spec: Option<&str>) -> Result<Option<ProviderSpec>> {
    spec.map(|s| s.parse::<ProviderSpec>().map_err(anyhow::Error::msg))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_token_defaults_to_stable() {
        assert_eq!(version_token(None), VersionToken::Stable);
        assert_eq!(version_token(Some("beta")), VersionToken::Channel("beta".into()));
        assert_eq!(
            version_token(Some("5.1.22")),
            VersionToken::Literal("5.1.22".into())
        );
    }

    #[test]
    fn test_provider_spec() {
        assert!(provider_spec(None).unwrap().is_none());
        assert!(provider_spec(Some("pecl")).unwrap().is_some());
        assert!(provider_spec(Some("github:")).is_err());
    }
}
