//! PECL provider.
//!
//! Resolves versions through the PECL REST interface:
//!
//! ```text
//! <base>/rest/r/<package>/stable.txt     newest release on a channel
//! <base>/rest/r/<package>/<version>.xml  release metadata
//! <base>/get/<Package>-<version>.tgz     release tarball
//! ```

use std::sync::Arc;

use url::Url;

use crate::core::{PackageLocator, ProviderId, VersionToken};
use crate::sources::provider::{Provider, ProviderError};
use crate::util::http::Transport;

pub struct PeclProvider {
    base: Url,
    transport: Arc<dyn Transport>,
}

impl PeclProvider {
    pub fn new(mut base: Url, transport: Arc<dyn Transport>) -> Self {
        // Url::join replaces the last segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        PeclProvider { base, transport }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base.join(path).map_err(|e| ProviderError::Invalid {
            provider: ProviderId::Pecl,
            message: format!("bad PECL URL `{}`: {}", path, e),
        })
    }

    /// Ask the channel file for the newest release on `channel`.
    fn channel_version(&self, package: &str, channel: &str) -> Result<String, ProviderError> {
        let url = self.endpoint(&format!(
            "rest/r/{}/{}.txt",
            package.to_ascii_lowercase(),
            channel
        ))?;
        tracing::debug!("reading PECL channel {}", url);

        let text = self
            .transport
            .get_text(&url)
            .map_err(|e| ProviderError::from_transport(&ProviderId::Pecl, package, channel, e))?;
        let version = text.trim();
        if version.is_empty() || version.contains(char::is_whitespace) {
            return Err(ProviderError::NotFound {
                provider: ProviderId::Pecl,
                package: package.to_string(),
                version: channel.to_string(),
            });
        }
        Ok(version.to_string())
    }

    /// Confirm that a literal release exists.
    fn check_release(&self, package: &str, version: &str) -> Result<(), ProviderError> {
        let url = self.endpoint(&format!(
            "rest/r/{}/{}.xml",
            package.to_ascii_lowercase(),
            version
        ))?;
        self.transport
            .get_text(&url)
            .map(|_| ())
            .map_err(|e| ProviderError::from_transport(&ProviderId::Pecl, package, version, e))
    }
}

/// Reject names that would step outside their place in a REST URL.
fn check_segment(what: &str, s: &str) -> Result<(), ProviderError> {
    let bad = s.is_empty()
        || s.starts_with('.')
        || s.contains(['/', '\\', '?', '#', '%'])
        || s.contains(char::is_whitespace);
    if bad {
        return Err(ProviderError::Invalid {
            provider: ProviderId::Pecl,
            message: format!("invalid {} `{}`", what, s),
        });
    }
    Ok(())
}

impl Provider for PeclProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Pecl
    }

    fn resolve(
        &self,
        package: &str,
        token: &VersionToken,
    ) -> Result<PackageLocator, ProviderError> {
        check_segment("package name", package)?;

        let version = match token {
            VersionToken::Literal(version) => {
                check_segment("version", version)?;
                self.check_release(package, version)?;
                version.clone()
            }
            // PECL publishes `latest.txt` alongside the per-channel files.
            symbolic => {
                let channel = symbolic.channel().unwrap_or("stable");
                let version = self.channel_version(package, channel)?;
                check_segment("version", &version)?;
                version
            }
        };

        let url = self.endpoint(&format!("get/{}-{}.tgz", package, version))?;
        Ok(PackageLocator::archive(
            ProviderId::Pecl,
            package,
            version,
            url,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;

    fn provider(transport: &Arc<MockTransport>) -> PeclProvider {
        let transport: Arc<dyn Transport> = transport.clone();
        PeclProvider::new(Url::parse("https://pecl.example").unwrap(), transport)
    }

    #[test]
    fn test_resolve_latest_reads_channel_file() {
        let transport = Arc::new(MockTransport::new());
        transport.add_text("https://pecl.example/rest/r/apcu/latest.txt", "5.1.23\n");

        let loc = provider(&transport)
            .resolve("APCu", &VersionToken::Latest)
            .unwrap();
        assert_eq!(loc.version, "5.1.23");
        assert_eq!(loc.package, "APCu");
        assert_eq!(
            loc.url().map(Url::as_str),
            Some("https://pecl.example/get/APCu-5.1.23.tgz")
        );
    }

    #[test]
    fn test_resolve_channel() {
        let transport = Arc::new(MockTransport::new());
        transport.add_text("https://pecl.example/rest/r/xdebug/beta.txt", "3.4.0beta1");

        let token: VersionToken = "beta".parse().unwrap();
        let loc = provider(&transport).resolve("xdebug", &token).unwrap();
        assert_eq!(loc.version, "3.4.0beta1");
    }

    #[test]
    fn test_resolve_literal_checks_release() {
        let transport = Arc::new(MockTransport::new());
        transport.add_text("https://pecl.example/rest/r/yaml/2.2.3.xml", "<r/>");

        let p = provider(&transport);
        let loc = p
            .resolve("yaml", &VersionToken::Literal("2.2.3".into()))
            .unwrap();
        assert_eq!(loc.version, "2.2.3");

        let err = p
            .resolve("yaml", &VersionToken::Literal("9.9.9".into()))
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[test]
    fn test_unavailable_upstream() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_with_unavailable("https://pecl.example/rest/r/apcu/stable.txt");

        let err = provider(&transport)
            .resolve("apcu", &VersionToken::Stable)
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_base_url_keeps_path() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport::new());
        let p = PeclProvider::new(Url::parse("file:///srv/mirror/pecl").unwrap(), transport);
        assert_eq!(
            p.endpoint("get/APCu-5.1.22.tgz").unwrap().as_str(),
            "file:///srv/mirror/pecl/get/APCu-5.1.22.tgz"
        );
    }

    #[test]
    fn test_invalid_package_name() {
        let transport = Arc::new(MockTransport::new());
        let err = provider(&transport)
            .resolve("", &VersionToken::Stable)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Invalid { .. }));
    }

    #[test]
    fn test_version_cannot_leave_release_path() {
        let transport = Arc::new(MockTransport::new());
        let p = provider(&transport);
        for version in ["../../x", "..", "1.0?x=1", "1.0%2F..", "1.0#frag"] {
            let err = p
                .resolve("apcu", &VersionToken::Literal(version.into()))
                .unwrap_err();
            assert!(matches!(err, ProviderError::Invalid { .. }), "{}", version);
        }
        assert!(transport.requests().is_empty());

        // A channel file is not trusted either.
        transport.add_text("https://pecl.example/rest/r/apcu/stable.txt", "../../evil");
        let err = p.resolve("apcu", &VersionToken::Stable).unwrap_err();
        assert!(matches!(err, ProviderError::Invalid { .. }));
        assert_eq!(transport.requests().len(), 1);
    }
}
