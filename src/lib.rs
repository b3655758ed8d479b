//! extbrew - build and install PHP extensions against installed runtimes
//!
//! This crate provides the core library functionality for extbrew:
//! providers that locate extension sources, the download cache, the recipe
//! factory and the extension manager that builds and registers modules.

pub mod builder;
pub mod core;
pub mod ops;
pub mod recipes;
pub mod sources;
pub mod util;

/// Test utilities and mocks for extbrew unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides mock implementations for the network
/// transport, git remotes and build commands.
#[cfg(test)]
pub mod test_support;

pub use core::{ExtensionRecipe, PackageLocator, ProviderSpec, TargetRuntime, VersionToken};
pub use ops::{ExtensionManager, InstallOptions, InstallResult};
pub use recipes::ExtensionFactory;
pub use util::context::GlobalContext;
