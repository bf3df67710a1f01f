//! Adapters Command - list integrated scanners

use anyhow::Result;
use clap::Args;
use vigil_core::domain::TargetType;

use crate::app::create_app;
use crate::cli::context::CliContext;
use crate::cli::exit_codes;
use crate::cli::output::OutputFormat;

/// Arguments for the adapters command
#[derive(Args, Debug)]
pub struct AdaptersArgs {
    /// Only show adapters whose tool is installed
    #[arg(long)]
    pub available: bool,
}

pub async fn run(ctx: &CliContext, args: &AdaptersArgs) -> Result<i32> {
    let app = create_app(ctx.config.clone()).await?;
    let mut adapters = app.service.list_adapters();
    app.shutdown().await;

    if args.available {
        adapters.retain(|a| a.available);
    }

    if ctx.output.format() == OutputFormat::Json {
        ctx.output.json(&adapters)?;
        return Ok(exit_codes::SUCCESS);
    }

    let join = |types: &[TargetType]| {
        types
            .iter()
            .map(TargetType::as_str)
            .collect::<Vec<_>>()
            .join(",")
    };
    let rows: Vec<Vec<String>> = adapters
        .iter()
        .map(|info| {
            let descriptor = &info.descriptor;
            let mut targets = join(&descriptor.target_types);
            if !descriptor.extended_target_types.is_empty() {
                targets.push_str(&format!(" (+{} on full)", join(&descriptor.extended_target_types)));
            }
            vec![
                info.name.clone(),
                if info.available { "yes" } else { "no" }.to_string(),
                descriptor.default_tier.to_string(),
                targets,
                descriptor.description.clone(),
            ]
        })
        .collect();
    ctx.output.table(
        &["ADAPTER", "AVAILABLE", "TIER", "TARGETS", "DESCRIPTION"],
        &rows,
    )?;
    Ok(exit_codes::SUCCESS)
}
