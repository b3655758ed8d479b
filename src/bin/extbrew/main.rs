//! extbrew CLI - build and install PHP extensions

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands, GlobalArgs, MessageFormat};
use extbrew::util::{GlobalContext, Shell};

/// Options shared by every command.
pub struct GlobalOptions {
    pub shell: Arc<Shell>,
    /// Runtime chosen with `--runtime` or `EXTBREW_RUNTIME`
    pub runtime: Option<String>,
}

impl GlobalOptions {
    fn from_args(args: &GlobalArgs) -> Self {
        let shell = Shell::from_flags(
            args.quiet,
            args.verbose,
            args.color,
            args.message_format == MessageFormat::Json,
        );
        GlobalOptions {
            shell: Arc::new(shell),
            runtime: args.runtime.clone(),
        }
    }

    /// Load the global context with the selected runtime applied.
    pub fn context(&self) -> Result<GlobalContext> {
        let mut ctx = GlobalContext::new()?;
        ctx.set_runtime(self.runtime.clone());
        Ok(ctx)
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = if cli.global.verbose {
        EnvFilter::new("extbrew=debug")
    } else if cli.global.quiet {
        EnvFilter::new("extbrew=error")
    } else {
        EnvFilter::new("extbrew=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let global = GlobalOptions::from_args(&cli.global);

    match cli.command {
        Commands::Install(args) => commands::install::execute(args, &global),
        Commands::Download(args) => commands::download::execute(args, &global),
        Commands::List => commands::list::execute(&global),
        Commands::Enable(args) => commands::enable::execute(args, &global),
        Commands::Disable(args) => commands::enable::execute_disable(args, &global),
        Commands::Remove(args) => commands::remove::execute(args, &global),
        Commands::Cache(args) => commands::cache::execute(args, &global),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
