//! Installing several extensions at once.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rayon::prelude::*;

use crate::core::TargetRuntime;
use crate::ops::install::{ExtensionManager, InstallOptions};
use crate::ops::result::InstallResult;
use crate::util::context::InstallContext;

/// One extension to install into one runtime.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub name: String,
    pub runtime: TargetRuntime,
    pub options: InstallOptions,
}

impl InstallRequest {
    pub fn new(name: impl Into<String>, runtime: TargetRuntime, options: InstallOptions) -> Self {
        InstallRequest {
            name: name.into(),
            runtime,
            options,
        }
    }
}

impl ExtensionManager {
    /// Install every request, returning results in request order.
    ///
    /// Requests for different runtimes build in parallel. Requests sharing a
    /// runtime run one after another in the order given.
    pub fn install_many(
        &self,
        requests: &[InstallRequest],
        ctx: &InstallContext,
    ) -> Vec<InstallResult> {
        let mut groups: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
        for (idx, request) in requests.iter().enumerate() {
            groups
                .entry(request.runtime.lock_key())
                .or_default()
                .push(idx);
        }
        tracing::debug!(
            "installing {} extension(s) across {} runtime(s)",
            requests.len(),
            groups.len()
        );

        let mut results: Vec<(usize, InstallResult)> = groups
            .into_par_iter()
            .flat_map_iter(|(_, indices)| {
                indices.into_iter().map(|idx| {
                    let request = &requests[idx];
                    let result = self.install_extension(
                        &request.name,
                        &request.runtime,
                        &request.options,
                        ctx,
                    );
                    (idx, result)
                })
            })
            .collect();

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Stage;
    use crate::core::VersionToken;
    use crate::recipes::ExtensionFactory;
    use crate::sources::{ArtifactCache, Downloader, ProviderSet, RetryPolicy};
    use crate::test_support::fixtures::{apcu_tarball, fake_runtime};
    use crate::test_support::{MockTransport, ScriptedRunner, StaticRefs};
    use std::sync::Arc;
    use tempfile::TempDir;
    use url::Url;

    #[test]
    fn test_install_many_across_runtimes() {
        let tmp = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.add_text("https://pecl.test/rest/r/apcu/stable.txt", "5.1.22");
        transport.add_body("https://pecl.test/get/APCu-5.1.22.tgz", apcu_tarball("5.1.22"));

        let manager = ExtensionManager::new(
            ExtensionFactory::with_builtin(),
            ProviderSet::new(transport.clone())
                .with_pecl_url(Url::parse("https://pecl.test/").unwrap())
                .with_refs(Arc::new(StaticRefs::unreachable())),
            Downloader::new(
                ArtifactCache::new(tmp.path().join("cache")),
                transport.clone(),
                tmp.path().join("build"),
            )
            .with_retry(RetryPolicy::none()),
        )
        .with_runner(Arc::new(ScriptedRunner::new()));

        let php81 = fake_runtime(&tmp.path().join("php-8.1"), "8.1");
        let php83 = fake_runtime(&tmp.path().join("php-8.3"), "8.3");
        let options = InstallOptions {
            version: VersionToken::Stable,
            ..InstallOptions::default()
        };
        let requests = vec![
            InstallRequest::new("APCu", php81.clone(), options.clone()),
            InstallRequest::new("APCu", php83.clone(), options.clone()),
            InstallRequest::new("swoole", php81.clone(), options.clone()),
            InstallRequest::new("APCu", php81.clone(), options),
        ];

        let results = manager.install_many(&requests, &InstallContext::quiet());
        assert_eq!(results.len(), 4);
        assert!(results[0].is_installed());
        assert!(results[1].is_installed());
        // swoole comes from GitHub, which is unreachable here
        assert_eq!(results[2].failure().unwrap().stage, Stage::Fetch);
        assert!(results[3].installed().unwrap().replaced);

        assert_eq!(php81.manifest().entries().unwrap().len(), 1);
        assert_eq!(php83.manifest().entries().unwrap().len(), 1);
        // Cache writers for one key are serialized, so the archive is fetched once.
        assert_eq!(transport.fetch_count("https://pecl.test/get/APCu-5.1.22.tgz"), 1);
    }
}
