//! Shared utilities

pub mod cancel;
pub mod config;
pub mod context;
pub mod diagnostic;
pub mod fs;
pub mod hash;
pub mod http;
pub mod lock;
pub mod process;
pub mod shell;

pub use cancel::CancelToken;
pub use config::Config;
pub use context::{GlobalContext, InstallContext};
pub use diagnostic::Diagnostic;
pub use shell::Shell;
