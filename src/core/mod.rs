//! Core data structures for extbrew.
//!
//! This module contains the foundational types used throughout extbrew:
//! - Version tokens and runtime versions
//! - Provider selection and resolved package locators
//! - Extension recipes
//! - Target runtimes and their extension manifests

pub mod locator;
pub mod manifest;
pub mod package_xml;
pub mod provider_spec;
pub mod recipe;
pub mod runtime;
pub mod version;

pub use locator::{Checksum, LocatorSource, PackageLocator, ProviderId};
pub use manifest::{ExtensionManifest, ManifestEntry};
pub use package_xml::PackageXml;
pub use provider_spec::ProviderSpec;
pub use recipe::{BuildHook, ExtensionRecipe, HookPoint};
pub use runtime::TargetRuntime;
pub use version::{RuntimeVersion, VersionToken};
