//! CLI Context - configuration, logging and output shared by commands

use anyhow::Context;
use vigil_core::Config;

use crate::cli::Cli;
use crate::cli::output::OutputWriter;

pub struct CliContext {
    pub config: Config,
    pub output: OutputWriter,
}

impl CliContext {
    /// Load configuration and initialize logging from parsed arguments.
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let mut config =
            crate::config::load(cli.config.as_deref()).context("Failed to load configuration")?;

        if cli.verbose {
            config.logging.level = "debug".to_string();
        } else if cli.quiet {
            config.logging.level = "error".to_string();
        }
        vigil_core::init_tracing(&config.logging).context("Failed to initialize logging")?;

        Ok(Self {
            config,
            output: OutputWriter::new(cli.format, cli.quiet),
        })
    }
}
