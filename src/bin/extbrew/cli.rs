//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell as CompletionShell;

use extbrew::util::context::RUNTIME_ENV;
use extbrew::util::shell::ColorChoice;

/// extbrew - build and install PHP extensions against installed runtimes
#[derive(Parser)]
#[command(name = "extbrew")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Coloring: auto, always, never
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    pub color: ColorChoice,

    /// Output format for messages
    #[arg(long, global = true, value_enum, default_value_t = MessageFormat::Human)]
    pub message_format: MessageFormat,

    /// Runtime version to operate on (e.g. 8.1)
    #[arg(long, global = true, env = RUNTIME_ENV)]
    pub runtime: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and install an extension into the active runtime
    Install(InstallArgs),

    /// Fetch and unpack an extension without building it
    Download(DownloadArgs),

    /// List extensions installed in the active runtime
    List,

    /// Load an installed extension again
    Enable(NameArgs),

    /// Stop loading an installed extension
    Disable(NameArgs),

    /// Uninstall an extension
    Remove(NameArgs),

    /// Manage the download cache
    Cache(CacheArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct InstallArgs {
    /// Extension name
    pub name: String,

    /// Version, tag, branch, or channel (latest, stable, beta, alpha, devel)
    pub version: Option<String>,

    /// Provider to fetch from (pecl, github:owner/repo, local:/path)
    #[arg(long, value_name = "SPEC")]
    pub provider: Option<String>,

    /// Extra flag for ./configure (repeatable)
    #[arg(long = "configure-flag", value_name = "FLAG", allow_hyphen_values = true)]
    pub configure_flags: Vec<String>,

    /// Expected sha256 of the downloaded archive
    #[arg(long, value_name = "HEX")]
    pub sha256: Option<String>,

    /// Keep the build directory after a successful install
    #[arg(long)]
    pub keep_build_dir: bool,

    /// Number of parallel make jobs
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct DownloadArgs {
    /// Extension name
    pub name: String,

    /// Version, tag, branch, or channel
    pub version: Option<String>,

    /// Provider to fetch from
    #[arg(long, value_name = "SPEC")]
    pub provider: Option<String>,

    /// Expected sha256 of the downloaded archive
    #[arg(long, value_name = "HEX")]
    pub sha256: Option<String>,
}

#[derive(Args)]
pub struct NameArgs {
    /// Extension name
    pub name: String,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show the cache directory
    Path,

    /// List cached archives
    List,

    /// Remove cached archives
    Clean(CacheCleanArgs),
}

#[derive(Args)]
pub struct CacheCleanArgs {
    /// Also remove leftover build directories
    #[arg(long)]
    pub builds: bool,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: CompletionShell,
}
