//! Implementation of `extbrew install`.
//!
//! The install pipeline runs in fixed stages against one runtime:
//!
//! 1. Resolve: pick the recipe and provider, check runtime compatibility
//! 2. Fetch: resolve the version, download through the cache, extract
//! 3. Configure: hooks, `phpize`, `./configure`
//! 4. Build: `make`, post-build hooks
//! 5. Install: copy the module, write the ini file, update the manifest
//!
//! Installs into the same runtime are serialized; the runtime directory is
//! only touched in the last stage.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

use crate::builder::{BuildPlan, Stage, StepRunner, SystemRunner};
use crate::core::recipe::normalize_name;
use crate::core::{
    Checksum, ExtensionRecipe, ManifestEntry, ProviderSpec, TargetRuntime, VersionToken,
};
use crate::ops::result::{InstallError, InstallFailure, InstallResult, InstalledExtension, StageFailure};
use crate::recipes::ExtensionFactory;
use crate::sources::{ArtifactCache, Downloader, ExtractedSource, FetchError, ProviderSet};
use crate::util::context::{GlobalContext, InstallContext};
use crate::util::fs::{ensure_dir, glob_files, remove_file_if_exists, stage_copy, write_atomic, StagedFile};
use crate::util::hash::sha256_file;
use crate::util::http::HttpTransport;
use crate::util::lock::with_path_lock;
use crate::util::process::ExecLimits;
use crate::util::shell::Status;

/// Name of the log written into each working directory.
pub const BUILD_LOG: &str = "build.log";

/// Options for installing one extension.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Version to install
    pub version: VersionToken,

    /// Provider to use instead of the recipe's
    pub provider: Option<ProviderSpec>,

    /// Extra configure flags, merged over the recipe's
    pub configure_flags: Vec<String>,

    /// Expected archive checksum (hex sha256)
    pub sha256: Option<String>,

    /// Keep the working directory after a successful install
    pub keep_build_dir: bool,

    /// Parallel make jobs
    pub jobs: Option<usize>,
}

/// Orchestrates installs of extensions into runtimes.
pub struct ExtensionManager {
    factory: ExtensionFactory,
    providers: ProviderSet,
    downloader: Downloader,
    runner: Arc<dyn StepRunner>,
    default_provider: Option<ProviderSpec>,
    configure_timeout: Option<Duration>,
    build_timeout: Option<Duration>,
    jobs: usize,
}

impl ExtensionManager {
    pub fn new(factory: ExtensionFactory, providers: ProviderSet, downloader: Downloader) -> Self {
        ExtensionManager {
            factory,
            providers,
            downloader,
            runner: Arc::new(SystemRunner),
            default_provider: None,
            configure_timeout: None,
            build_timeout: None,
            jobs: 1,
        }
    }

    /// Build a manager from the global configuration.
    pub fn from_context(gctx: &GlobalContext) -> Result<Self> {
        let config = gctx.config();

        let mut factory = ExtensionFactory::with_builtin();
        for file in &config.recipes {
            let path = if file.is_absolute() {
                file.clone()
            } else {
                gctx.home().join(file)
            };
            let count = factory.load_file(&path)?;
            tracing::debug!("loaded {} recipe(s) from {}", count, path.display());
        }

        let transport = Arc::new(HttpTransport::new(config.fetch_timeout())?);
        let pecl_url = Url::parse(config.pecl_url())
            .with_context(|| format!("invalid providers.pecl_url: {}", config.pecl_url()))?;
        let providers = ProviderSet::new(transport.clone()).with_pecl_url(pecl_url);

        let downloader = Downloader::new(
            ArtifactCache::new(gctx.cache_dir()),
            transport,
            gctx.build_dir(),
        )
        .with_retry(config.retry_policy());

        let default_provider = match &config.providers.default {
            Some(spec) => Some(
                spec.parse::<ProviderSpec>()
                    .map_err(|e| anyhow!("invalid providers.default: {}", e))?,
            ),
            None => None,
        };

        let mut manager = ExtensionManager::new(factory, providers, downloader)
            .with_timeouts(config.configure_timeout(), config.build_timeout())
            .with_jobs(config.jobs());
        manager.default_provider = default_provider;
        Ok(manager)
    }

    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_timeouts(mut self, configure: Duration, build: Duration) -> Self {
        self.configure_timeout = Some(configure);
        self.build_timeout = Some(build);
        self
    }

    /// Default parallelism when the options do not set one.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn factory(&self) -> &ExtensionFactory {
        &self.factory
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Install `name` into `runtime`.
    ///
    /// Never panics on build problems: every failure comes back as
    /// [`InstallResult::Failed`] with the stage it happened in.
    pub fn install_extension(
        &self,
        name: &str,
        runtime: &TargetRuntime,
        options: &InstallOptions,
        ctx: &InstallContext,
    ) -> InstallResult {
        let span = tracing::info_span!(
            "install",
            extension = %normalize_name(name),
            runtime = %runtime.version()
        );
        let _enter = span.enter();

        with_path_lock("runtime", &runtime.lock_key(), || {
            let mut attempt = Attempt {
                manager: self,
                runtime,
                options,
                ctx,
                stage: Stage::Resolve,
                source: None,
            };
            let outcome = attempt.run(name);
            attempt.finish(name, outcome)
        })
    }

    /// Fetch and unpack `name` without building it.
    ///
    /// With a runtime, extensions bundled with PHP come from its source tree
    /// and the recipe's PHP requirement is checked. The working directory is
    /// left for the caller.
    pub fn fetch_source(
        &self,
        name: &str,
        runtime: Option<&TargetRuntime>,
        options: &InstallOptions,
        ctx: &InstallContext,
    ) -> Result<ExtractedSource, InstallError> {
        let (recipe, spec) = self.select(name, runtime, options.provider.as_ref())?;
        if let Some(runtime) = runtime {
            check_compatible(&recipe, runtime)?;
        }
        self.fetch_recipe(name, &recipe, &spec, options, ctx)
    }

    /// Choose the recipe and provider for `name`.
    ///
    /// An explicit provider wins. Without a registered recipe, an extension
    /// the runtime ships in its source tree is built from there.
    pub(crate) fn select(
        &self,
        name: &str,
        runtime: Option<&TargetRuntime>,
        provider: Option<&ProviderSpec>,
    ) -> Result<(ExtensionRecipe, ProviderSpec), InstallError> {
        let key = normalize_name(name);
        let registered = self.factory.lookup(&key).cloned();
        let bundled_dir = runtime.and_then(|rt| rt.bundled_extension_dir(&key));

        let spec = match (provider, &registered) {
            (Some(spec), _) => spec.clone(),
            (None, Some(recipe)) if recipe.bundled => match bundled_dir {
                Some(dir) => ProviderSpec::local(dir),
                None => {
                    return Err(InstallError::Incompatible(match runtime {
                        Some(rt) => format!(
                            "{} is bundled with PHP but runtime {} has no source tree for it",
                            key,
                            rt.version()
                        ),
                        None => format!("{} is bundled with PHP; select a runtime to fetch it", key),
                    }))
                }
            },
            (None, Some(recipe)) => recipe.provider.clone(),
            (None, None) => match bundled_dir {
                Some(dir) => {
                    tracing::debug!("building {} from {}", key, dir.display());
                    ProviderSpec::local(dir)
                }
                None => self.default_provider.clone().unwrap_or_default(),
            },
        };

        let recipe = registered.unwrap_or_else(|| ExtensionRecipe::generic(key));
        Ok((recipe, spec))
    }

    /// Resolve, verify and unpack the sources for a selected recipe.
    fn fetch_recipe(
        &self,
        name: &str,
        recipe: &ExtensionRecipe,
        spec: &ProviderSpec,
        options: &InstallOptions,
        ctx: &InstallContext,
    ) -> Result<ExtractedSource, InstallError> {
        let provider = self.providers.provider_for(spec);
        let package = spec.package_name(name.trim());
        let locator = self
            .downloader
            .resolve(provider.as_ref(), package, &options.version, ctx)?;
        if recipe.is_broken(&locator.version) {
            return Err(InstallError::Incompatible(format!(
                "{} {} is known not to build; pick another version",
                recipe.name, locator.version
            )));
        }
        let expected = options
            .sha256
            .as_deref()
            .map(Checksum::sha256)
            .or_else(|| recipe.pinned_checksum(&locator.version));
        Ok(self.downloader.fetch(&locator, expected.as_ref(), ctx)?)
    }
}

fn check_compatible(recipe: &ExtensionRecipe, runtime: &TargetRuntime) -> Result<(), InstallError> {
    match &recipe.php_versions {
        Some(req) if !runtime.version().satisfies(req) => Err(InstallError::Incompatible(format!(
            "{} requires PHP {}, runtime is {}",
            recipe.name,
            req,
            runtime.version()
        ))),
        _ => Ok(()),
    }
}

/// State of one install while it runs.
struct Attempt<'a> {
    manager: &'a ExtensionManager,
    runtime: &'a TargetRuntime,
    options: &'a InstallOptions,
    ctx: &'a InstallContext,
    stage: Stage,
    source: Option<ExtractedSource>,
}

impl Attempt<'_> {
    fn run(&mut self, name: &str) -> Result<InstalledExtension, InstallError> {
        let manager = self.manager;
        let runtime = self.runtime;

        // Resolve
        let (recipe, spec) = manager.select(name, Some(runtime), self.options.provider.as_ref())?;
        check_compatible(&recipe, runtime)?;

        // Fetch
        self.enter(Stage::Fetch)?;
        let source = manager.fetch_recipe(name, &recipe, &spec, self.options, self.ctx)?;
        self.source = Some(source.clone());

        // Configure and build
        self.enter(Stage::Configure)?;
        let options = InstallOptions {
            jobs: Some(self.options.jobs.unwrap_or(manager.jobs)),
            ..self.options.clone()
        };
        let plan = BuildPlan::new(&recipe, runtime, &options, &source.source_dir);
        let log = source.work_dir.join(BUILD_LOG);
        self.run_plan(&plan, &log)?;

        // Install
        self.enter(Stage::Install)?;
        let zend = recipe.zend || source.package_xml.as_ref().is_some_and(|xml| xml.zend);
        self.ctx
            .shell
            .status(Status::Installing, format!("{} into {}", recipe.name, runtime.extension_dir().display()));
        let installed = built_module(&plan)
            .and_then(|module| install_artifact(runtime, &recipe, &module, zend, &source))
            .map_err(InstallError::Install)?;

        let build_dir = if self.options.keep_build_dir {
            Some(source.work_dir.clone())
        } else {
            if let Err(e) = source.discard() {
                tracing::warn!("failed to remove {}: {:#}", source.work_dir.display(), e);
            }
            None
        };

        Ok(InstalledExtension {
            runtime: runtime.version().clone(),
            cache_hit: source.cache_hit,
            build_dir,
            ..installed
        })
    }

    fn enter(&mut self, stage: Stage) -> Result<(), InstallError> {
        if self.ctx.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        tracing::debug!("entering stage {}", stage);
        self.stage = stage;
        Ok(())
    }

    fn run_plan(&mut self, plan: &BuildPlan, log: &Path) -> Result<(), InstallError> {
        let mut log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .map_err(|e| anyhow::Error::new(e).context(format!("failed to open {}", log.display())))
            .map_err(InstallError::Install)?;

        for step in &plan.steps {
            if step.stage != self.stage {
                self.enter(step.stage)?;
            } else if self.ctx.is_cancelled() {
                return Err(InstallError::Cancelled);
            }

            let status = match step.stage {
                Stage::Configure => Status::Configuring,
                _ => Status::Building,
            };
            self.ctx.shell.status(status, &step.label);

            let limits = ExecLimits {
                timeout: match step.stage {
                    Stage::Configure => self.manager.configure_timeout,
                    _ => self.manager.build_timeout,
                },
                cancel: self.ctx.cancel.clone(),
            };
            let command = step.command.display_command();
            let cwd = step
                .command
                .get_cwd()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| plan.source_dir.clone());

            let _ = writeln!(log_file, "$ {}", command);
            let failure = match self.manager.runner.run(step, &limits) {
                Ok(out) => {
                    let _ = log_file.write_all(out.output.as_bytes());
                    self.ctx.shell.raw(&out.output);
                    if out.cancelled {
                        return Err(InstallError::Cancelled);
                    }
                    if out.success() {
                        continue;
                    }
                    StageFailure::from_output(command, cwd, &out)
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    let _ = writeln!(log_file, "{}", message);
                    StageFailure {
                        command,
                        cwd,
                        code: None,
                        output: message,
                        timed_out: false,
                        log: None,
                    }
                }
            };

            let failure = StageFailure {
                log: Some(log.to_path_buf()),
                ..failure
            };
            tracing::info!("{} failed: {}", step.label, failure);
            return Err(match step.stage {
                Stage::Configure => InstallError::Configure(failure),
                _ => InstallError::Build(failure),
            });
        }
        Ok(())
    }

    fn finish(
        self,
        name: &str,
        outcome: Result<InstalledExtension, InstallError>,
    ) -> InstallResult {
        let error = match outcome {
            Ok(installed) => {
                self.ctx.shell.status(
                    Status::Installed,
                    format!("{} {} for PHP {}", installed.name, installed.version, installed.runtime),
                );
                return InstallResult::Installed(installed);
            }
            Err(error) => error,
        };

        let cancelled = matches!(
            error,
            InstallError::Cancelled | InstallError::Fetch(FetchError::Cancelled)
        );
        let build_dir = match &self.source {
            Some(source) if cancelled => {
                if let Err(e) = source.discard() {
                    tracing::warn!("failed to remove {}: {:#}", source.work_dir.display(), e);
                }
                None
            }
            Some(source) => Some(source.work_dir.clone()),
            None => None,
        };

        InstallResult::Failed(InstallFailure {
            extension: normalize_name(name),
            runtime: self.runtime.version().clone(),
            stage: self.stage,
            error,
            build_dir,
        })
    }
}

/// Contents of the ini file that loads a module.
pub(crate) fn render_ini(zend: bool, artifact: &Path, settings: &BTreeMap<String, String>) -> String {
    let mut ini = if zend {
        format!("zend_extension={}\n", artifact.display())
    } else {
        let file = artifact
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("extension={}\n", file)
    };
    for (key, value) in settings {
        ini.push_str(&format!("{}={}\n", key, value));
    }
    ini
}

/// The module `make` produced.
///
/// Falls back to the only `.so` under `modules/` when the extension names
/// its module differently from the recipe.
fn built_module(plan: &BuildPlan) -> Result<PathBuf> {
    if plan.artifact.is_file() {
        return Ok(plan.artifact.clone());
    }
    let found = glob_files(&plan.source_dir, &["modules/*.so".to_string()])?;
    match found.as_slice() {
        [module] => {
            tracing::debug!("expected {}, found {}", plan.artifact.display(), module.display());
            Ok(module.clone())
        }
        [] => bail!("build produced no module at {}", plan.artifact.display()),
        _ => bail!(
            "build produced {} modules in {} and none is named {}",
            found.len(),
            plan.source_dir.join("modules").display(),
            plan.artifact.display()
        ),
    }
}

/// Copy the built module into the runtime and register it.
///
/// The manifest is updated before the module or its ini goes live. If either
/// cannot be put in place afterwards, the previous manifest entry comes back.
fn install_artifact(
    runtime: &TargetRuntime,
    recipe: &ExtensionRecipe,
    built: &Path,
    zend: bool,
    source: &ExtractedSource,
) -> Result<InstalledExtension> {
    let file_name = built
        .file_name()
        .context("module path has no file name")?;

    ensure_dir(runtime.extension_dir())?;
    let dest: PathBuf = runtime.extension_dir().join(file_name);
    let staged = stage_copy(built, &dest)?;
    let sha256 = sha256_file(staged.path())?;

    let name = recipe.key();
    let manifest = runtime.manifest();
    let previous = manifest.get(&name)?;
    let entry = ManifestEntry {
        name: name.clone(),
        version: source.locator.version.clone(),
        provider: source.locator.provider.clone(),
        artifact: dest.clone(),
        sha256: sha256.clone(),
        zend,
        enabled: true,
    };
    let replaced = manifest.upsert(&entry)?;

    let ini = runtime.ini_path(&name);
    if let Err(e) = activate(runtime, &name, staged, &render_ini(zend, &dest, &recipe.ini)) {
        let undo = match &previous {
            Some(old) => manifest.upsert(old).map(drop),
            None => manifest
                .remove(&name)
                .map(drop)
                .and_then(|_| remove_file_if_exists(&ini))
                .and_then(|_| remove_file_if_exists(&dest)),
        };
        if let Err(undo) = undo {
            tracing::warn!("failed to roll back {}: {:#}", name, undo);
        }
        return Err(e);
    }

    tracing::info!(
        "{} {} {} in {}",
        if replaced { "updated" } else { "registered" },
        name,
        entry.version,
        runtime.manifest_path().display()
    );

    Ok(InstalledExtension {
        name,
        version: entry.version,
        provider: entry.provider,
        runtime: runtime.version().clone(),
        artifact: dest,
        sha256,
        ini,
        zend,
        replaced,
        cache_hit: source.cache_hit,
        build_dir: None,
    })
}

/// Move a registered module into place and write its ini.
fn activate(runtime: &TargetRuntime, name: &str, module: StagedFile, ini: &str) -> Result<()> {
    module.commit()?;
    ensure_dir(runtime.config_scan_dir())?;
    write_atomic(&runtime.ini_path(name), ini.as_bytes())?;
    remove_file_if_exists(&runtime.disabled_ini_path(name))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ProviderId, RuntimeVersion};
    use crate::ops::result::ErrorKind;
    use crate::sources::RetryPolicy;
    use crate::test_support::fixtures::{apcu_tarball, fake_runtime, TarballBuilder};
    use crate::test_support::{MockTransport, ScriptedRunner};
    use crate::util::cancel::CancelToken;
    use crate::util::hash::sha256_bytes;
    use tempfile::TempDir;

    const PECL: &str = "https://pecl.test/";

    struct Harness {
        tmp: TempDir,
        transport: Arc<MockTransport>,
        runner: Arc<ScriptedRunner>,
        runtime: TargetRuntime,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let runtime = fake_runtime(&tmp.path().join("php-8.1"), "8.1");
            let transport = Arc::new(MockTransport::new());
            let runner = Arc::new(ScriptedRunner::new());
            Harness {
                tmp,
                transport,
                runner,
                runtime,
            }
        }

        fn serve_apcu(&self, version: &str) {
            self.transport
                .add_text(&format!("{}rest/r/apcu/latest.txt", PECL), version);
            self.transport
                .add_text(&format!("{}rest/r/apcu/stable.txt", PECL), version);
            self.transport.add_body(
                &format!("{}get/APCu-{}.tgz", PECL, version),
                apcu_tarball(version),
            );
        }

        fn manager(&self) -> ExtensionManager {
            let providers = ProviderSet::new(self.transport.clone())
                .with_pecl_url(Url::parse(PECL).unwrap());
            let downloader = Downloader::new(
                ArtifactCache::new(self.tmp.path().join("cache")),
                self.transport.clone(),
                self.tmp.path().join("build"),
            )
            .with_retry(RetryPolicy::none());
            ExtensionManager::new(ExtensionFactory::with_builtin(), providers, downloader)
                .with_runner(self.runner.clone())
        }

        fn build_root(&self) -> PathBuf {
            self.tmp.path().join("build")
        }
    }

    fn latest() -> InstallOptions {
        InstallOptions {
            version: VersionToken::Latest,
            ..InstallOptions::default()
        }
    }

    fn work_dirs(root: &Path) -> usize {
        std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_install_apcu_latest_with_generic_recipe() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");

        let result = h
            .manager()
            .install_extension("APCu", &h.runtime, &latest(), &InstallContext::quiet());
        let installed = result.installed().expect("install succeeds");

        assert_eq!(installed.name, "apcu");
        assert_eq!(installed.version, "5.1.22");
        assert_eq!(installed.provider, ProviderId::Pecl);
        assert!(!installed.zend);
        assert_eq!(installed.artifact, h.runtime.extension_dir().join("apcu.so"));
        assert!(installed.artifact.is_file());

        let ini = std::fs::read_to_string(h.runtime.ini_path("apcu")).unwrap();
        assert_eq!(ini, "extension=apcu.so\n");

        let entries = h.runtime.manifest().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, "5.1.22");
        assert_eq!(entries[0].sha256, installed.sha256);

        assert_eq!(
            h.runner.labels(),
            ["phpize", "configure", "make"]
        );
        assert_eq!(work_dirs(&h.build_root()), 0);
    }

    #[test]
    fn test_reinstall_replaces_manifest_entry() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let manager = h.manager();
        let ctx = InstallContext::quiet();

        let first = manager.install_extension("APCu", &h.runtime, &latest(), &ctx);
        assert!(!first.installed().unwrap().replaced);

        let second = manager.install_extension("APCu", &h.runtime, &latest(), &ctx);
        let second = second.installed().unwrap();
        assert!(second.replaced);
        assert!(second.cache_hit);

        assert_eq!(h.runtime.manifest().entries().unwrap().len(), 1);
        assert_eq!(
            h.transport
                .fetch_count(&format!("{}get/APCu-5.1.22.tgz", PECL)),
            1
        );
    }

    #[test]
    fn test_build_failure_keeps_manifest_and_work_dir() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        h.runner.fail_label("make", 2, "apc_cache.c:42: error: expected ';'");

        let result = h
            .manager()
            .install_extension("APCu", &h.runtime, &latest(), &InstallContext::quiet());
        let failure = result.failure().expect("build fails");

        assert_eq!(failure.stage, Stage::Build);
        assert_eq!(failure.kind(), ErrorKind::Build);
        let stage = failure.error.stage_failure().unwrap();
        assert_eq!(stage.code, Some(2));
        assert!(stage.output.contains("expected ';'"));

        let build_dir = failure.build_dir.as_ref().unwrap();
        assert!(build_dir.is_dir());
        let log = std::fs::read_to_string(build_dir.join(BUILD_LOG)).unwrap();
        assert!(log.contains("expected ';'"));

        assert!(h.runtime.manifest().entries().unwrap().is_empty());
        assert!(!h.runtime.ini_path("apcu").exists());
    }

    #[test]
    fn test_unwritable_manifest_leaves_nothing_loadable() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let manifest = h.runtime.manifest_path();
        std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        std::fs::write(&manifest, "extension = 1\n").unwrap();

        let result = h
            .manager()
            .install_extension("APCu", &h.runtime, &latest(), &InstallContext::quiet());
        let failure = result.failure().expect("install fails");

        assert_eq!(failure.stage, Stage::Install);
        assert_eq!(failure.kind(), ErrorKind::Install);
        assert!(!h.runtime.ini_path("apcu").exists());
        assert!(!h.runtime.extension_dir().join("apcu.so").exists());
        assert_eq!(std::fs::read_to_string(&manifest).unwrap(), "extension = 1\n");
    }

    #[test]
    fn test_failed_upgrade_restores_manifest_entry() {
        let h = Harness::new();
        h.serve_apcu("5.1.21");
        let manager = h.manager();
        let ctx = InstallContext::quiet();
        let first = manager.install_extension("APCu", &h.runtime, &latest(), &ctx);
        assert!(first.installed().is_some());

        // A directory where the ini goes makes the last step fail.
        let ini = h.runtime.ini_path("apcu");
        std::fs::remove_file(&ini).unwrap();
        std::fs::create_dir_all(ini.join("blocker")).unwrap();

        h.serve_apcu("5.1.22");
        let second = manager.install_extension("APCu", &h.runtime, &latest(), &ctx);
        assert_eq!(second.failure().unwrap().stage, Stage::Install);

        let entries = h.runtime.manifest().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, "5.1.21");
    }

    #[test]
    fn test_configure_failure_then_rerun_reuses_cache() {
        let h = Harness::new();
        let version = "1.0.0";
        h.transport
            .add_text(&format!("{}rest/r/broken-ext/stable.txt", PECL), version);
        h.transport.add_body(
            &format!("{}get/broken-ext-{}.tgz", PECL, version),
            TarballBuilder::new()
                .file("broken-ext-1.0.0/config.m4", "PHP_ARG_ENABLE(broken_ext)")
                .file("broken-ext-1.0.0/broken_ext.c", "")
                .into_bytes(),
        );
        h.runner
            .fail_label("configure", 1, "configure: error: libbroken not found");
        let manager = h.manager();
        let ctx = InstallContext::quiet();

        let first = manager.install_extension("broken-ext", &h.runtime, &InstallOptions::default(), &ctx);
        let failure = first.failure().unwrap();
        assert_eq!(failure.stage, Stage::Configure);
        assert!(failure.diagnostic().to_string().contains("libbroken not found"));

        h.runner.clear_failures();
        let second = manager.install_extension("broken-ext", &h.runtime, &InstallOptions::default(), &ctx);
        let installed = second.installed().expect("rerun succeeds");
        assert!(installed.cache_hit);
        assert_eq!(installed.artifact.file_name().unwrap(), "broken_ext.so");
        assert_eq!(
            h.transport
                .fetch_count(&format!("{}get/broken-ext-{}.tgz", PECL, version)),
            1
        );
    }

    #[test]
    fn test_checksum_mismatch_fails_fetch() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let options = InstallOptions {
            sha256: Some("00".repeat(32)),
            ..latest()
        };

        let result = h
            .manager()
            .install_extension("APCu", &h.runtime, &options, &InstallContext::quiet());
        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, Stage::Fetch);
        assert_eq!(failure.kind(), ErrorKind::Integrity);
        assert!(failure.build_dir.is_none());
        assert!(h.runner.labels().is_empty());
    }

    #[test]
    fn test_matching_checksum_installs() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let options = InstallOptions {
            sha256: Some(sha256_bytes(&apcu_tarball("5.1.22"))),
            ..latest()
        };

        let result = h
            .manager()
            .install_extension("APCu", &h.runtime, &options, &InstallContext::quiet());
        assert!(result.is_installed());
    }

    #[test]
    fn test_incompatible_runtime() {
        let h = Harness::new();
        let runtime = fake_runtime(&h.tmp.path().join("php-7.4"), "7.4");

        let result = h.manager().install_extension(
            "swoole",
            &runtime,
            &InstallOptions::default(),
            &InstallContext::quiet(),
        );
        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, Stage::Resolve);
        assert_eq!(failure.kind(), ErrorKind::Incompatible);
        assert!(failure.error.to_string().contains(">=8.0"));
    }

    #[test]
    fn test_broken_version_is_rejected() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let mut factory = ExtensionFactory::with_builtin();
        let mut recipe = ExtensionRecipe::generic("apcu");
        recipe.broken_versions.push("5.1.22".into());
        factory.register(recipe);
        let mut manager = h.manager();
        manager.factory = factory;

        let result = manager.install_extension("APCu", &h.runtime, &latest(), &InstallContext::quiet());
        let failure = result.failure().unwrap();
        assert_eq!(failure.stage, Stage::Fetch);
        assert_eq!(failure.kind(), ErrorKind::Incompatible);
    }

    #[test]
    fn test_zend_recipe_and_ini_settings() {
        let h = Harness::new();
        h.transport
            .add_text(&format!("{}rest/r/xdebug/stable.txt", PECL), "3.3.1");
        h.transport.add_body(
            &format!("{}get/xdebug-3.3.1.tgz", PECL),
            TarballBuilder::new()
                .file("xdebug-3.3.1/config.m4", "PHP_ARG_ENABLE(xdebug)")
                .into_bytes(),
        );
        let mut factory = ExtensionFactory::with_builtin();
        let recipe = factory
            .lookup("xdebug")
            .cloned()
            .unwrap()
            .with_ini("xdebug.mode", "debug");
        factory.register(recipe);
        let mut manager = h.manager();
        manager.factory = factory;

        let result = manager.install_extension(
            "xdebug",
            &h.runtime,
            &InstallOptions::default(),
            &InstallContext::quiet(),
        );
        let installed = result.installed().unwrap();
        assert!(installed.zend);

        let ini = std::fs::read_to_string(&installed.ini).unwrap();
        assert_eq!(
            ini,
            format!(
                "zend_extension={}\nxdebug.mode=debug\n",
                installed.artifact.display()
            )
        );
        let configure = h.runner.step("configure").unwrap();
        assert!(configure.command.get_args().contains(&"--enable-xdebug".to_string()));
    }

    #[test]
    fn test_bundled_extension_builds_from_runtime_source() {
        let h = Harness::new();
        let src = h.runtime.prefix().join("src/ext/opcache");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("config.m4"), "PHP_ARG_ENABLE(opcache)").unwrap();
        let runtime = h.runtime.clone().with_source_dir(h.runtime.prefix().join("src"));

        let result = h.manager().install_extension(
            "opcache",
            &runtime,
            &InstallOptions::default(),
            &InstallContext::quiet(),
        );
        let installed = result.installed().unwrap();
        assert_eq!(installed.provider, ProviderId::Local);
        assert!(installed.zend);
        assert!(h.transport.requests().is_empty());
    }

    #[test]
    fn test_user_flags_merge_into_configure() {
        let h = Harness::new();
        h.transport
            .add_text(&format!("{}rest/r/redis/stable.txt", PECL), "6.0.2");
        h.transport.add_body(
            &format!("{}get/redis-6.0.2.tgz", PECL),
            TarballBuilder::new()
                .file("redis-6.0.2/config.m4", "PHP_ARG_ENABLE(redis)")
                .into_bytes(),
        );
        let options = InstallOptions {
            configure_flags: vec!["--enable-redis-igbinary".into()],
            jobs: Some(8),
            ..InstallOptions::default()
        };

        let result = h
            .manager()
            .install_extension("redis", &h.runtime, &options, &InstallContext::quiet());
        assert!(result.is_installed());

        let configure = h.runner.step("configure").unwrap();
        let args = configure.command.get_args();
        assert!(args.contains(&"--enable-redis-igbinary".to_string()));
        assert!(!args.contains(&"--disable-redis-igbinary".to_string()));
        assert_eq!(h.runner.step("make").unwrap().command.get_args(), ["-j8"]);
    }

    #[test]
    fn test_cancelled_install_discards_work_dir() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let cancel = CancelToken::new();
        h.runner.cancel_on("phpize", cancel.clone());
        let ctx = InstallContext::quiet().with_cancel(cancel);

        let result = h.manager().install_extension("APCu", &h.runtime, &latest(), &ctx);
        let failure = result.failure().unwrap();
        assert_eq!(failure.kind(), ErrorKind::Cancelled);
        assert!(failure.build_dir.is_none());
        assert_eq!(work_dirs(&h.build_root()), 0);
        assert!(h.runtime.manifest().entries().unwrap().is_empty());
    }

    #[test]
    fn test_keep_build_dir() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let options = InstallOptions {
            keep_build_dir: true,
            ..latest()
        };

        let result = h
            .manager()
            .install_extension("APCu", &h.runtime, &options, &InstallContext::quiet());
        let dir = result.installed().unwrap().build_dir.clone().unwrap();
        assert!(dir.join(BUILD_LOG).is_file());
    }

    #[test]
    fn test_render_ini() {
        let mut settings = BTreeMap::new();
        assert_eq!(
            render_ini(false, Path::new("/ext/apcu.so"), &settings),
            "extension=apcu.so\n"
        );
        settings.insert("opcache.enable_cli".to_string(), "1".to_string());
        assert_eq!(
            render_ini(true, Path::new("/ext/opcache.so"), &settings),
            "zend_extension=/ext/opcache.so\nopcache.enable_cli=1\n"
        );
    }

    #[test]
    fn test_runtime_version_reported() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let result = h
            .manager()
            .install_extension("APCu", &h.runtime, &latest(), &InstallContext::quiet());
        assert_eq!(
            result.installed().unwrap().runtime,
            RuntimeVersion::parse("8.1").unwrap()
        );
    }

    #[test]
    fn test_fetch_source_without_runtime() {
        let h = Harness::new();
        h.serve_apcu("5.1.22");
        let manager = h.manager();

        let source = manager
            .fetch_source("APCu", None, &latest(), &InstallContext::quiet())
            .unwrap();
        assert!(source.source_dir.join("config.m4").is_file());
        assert_eq!(source.locator.version, "5.1.22");
        assert!(h.runner.labels().is_empty());

        // opcache only exists inside a runtime's source tree
        let err = manager
            .fetch_source("opcache", None, &latest(), &InstallContext::quiet())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Incompatible);
    }

    #[test]
    fn test_module_named_differently_is_found() {
        let h = Harness::new();
        let src = h.tmp.path().join("checkout");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("config.m4"),
            "PHP_NEW_EXTENSION(demo_ext, demo.c, $ext_shared)\n",
        )
        .unwrap();

        let options = InstallOptions {
            provider: Some(ProviderSpec::local(&src)),
            ..InstallOptions::default()
        };
        let result = h
            .manager()
            .install_extension("demo", &h.runtime, &options, &InstallContext::quiet());
        let installed = result.installed().expect("install succeeds");
        assert_eq!(installed.artifact, h.runtime.extension_dir().join("demo_ext.so"));
        assert_eq!(installed.version, "0.0.0-local");
        assert_eq!(installed.provider, ProviderId::Local);
    }
}
