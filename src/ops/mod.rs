//! High-level operations.
//!
//! This module contains the implementation of extbrew commands.

pub mod batch;
pub mod install;
pub mod manage;
pub mod result;

pub use batch::InstallRequest;
pub use install::{ExtensionManager, InstallOptions, BUILD_LOG};
pub use result::{
    ErrorKind, InstallError, InstallFailure, InstallResult, InstalledExtension, StageFailure,
};
