//! Vigil CLI - run scans against a single target from the command line
//!
//! ```text
//! vigil scan example.com --profile web
//! vigil scan ./service --profile default --fail-on high --format json
//! vigil adapters
//! vigil profiles
//! ```

pub mod commands;
mod context;
pub mod output;

pub use context::CliContext;
pub use output::{OutputFormat, OutputWriter};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vigil - fan security tools out against a target and merge their findings
#[derive(Parser, Debug)]
#[command(
    name = "vigil",
    version,
    about = "Orchestrate security scanners against a target",
    long_about = "Vigil runs a profile of integrated scanners (nmap, nuclei, nikto, ZAP, \
                  semgrep, trivy, gitleaks and a built-in secret scanner) against one target, \
                  reuses recent results from its cache, and reports deduplicated findings."
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except results and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, env = "VIGIL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a target and print the merged findings
    #[command(visible_alias = "s")]
    Scan(commands::scan::ScanArgs),

    /// List integrated adapters and whether their tools are installed
    #[command(visible_alias = "a")]
    Adapters(commands::adapters::AdaptersArgs),

    /// Show the adapters each scan profile runs
    #[command(visible_alias = "p")]
    Profiles(commands::profiles::ProfilesArgs),
}

/// CLI application runner
pub struct CliApp {
    cli: Cli,
    context: CliContext,
}

impl CliApp {
    /// Parse arguments from the process and build the context
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let context = CliContext::new(&cli)?;
        Ok(Self { cli, context })
    }

    /// Run the CLI application
    pub async fn run(self) -> anyhow::Result<i32> {
        match self.cli.command {
            Commands::Scan(ref args) => commands::scan::run(&self.context, args).await,
            Commands::Adapters(ref args) => commands::adapters::run(&self.context, args).await,
            Commands::Profiles(ref args) => commands::profiles::run(&self.context, args),
        }
    }
}

/// Exit codes for CI integration
pub mod exit_codes {
    /// Scan completed with no findings at or above the threshold
    pub const SUCCESS: i32 = 0;
    /// Scan completed with findings at or above `--fail-on`
    pub const FINDINGS: i32 = 1;
    /// Configuration or input error
    pub const CONFIG_ERROR: i32 = 2;
    /// Scan failed: no adapter could run against the target
    pub const SCAN_FAILED: i32 = 3;
    /// Scan was cancelled (Ctrl+C)
    pub const CANCELLED: i32 = 4;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = 99;
}
