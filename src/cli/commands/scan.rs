//! Scan Command - run a profile of adapters against one target
//!
//! Progress is streamed to stderr while the scan runs. The first Ctrl+C
//! cancels the scan and still prints what finished; results are printed once
//! the scan reaches a terminal state.

use anyhow::Result;
use clap::Args;
use vigil_core::domain::{ScanProfile, ScanStatus, Severity, TargetIdentity, TargetType};
use vigil_orchestrator::{ScanRequest, ScanResults, ScanServiceError};

use crate::app::create_app;
use crate::cli::context::CliContext;
use crate::cli::exit_codes;
use crate::cli::output::{OutputFormat, OutputWriter};

/// Arguments for the scan command
#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Address, hostname, URL, CIDR range or local repository path
    pub target: String,

    /// Scan profile: quick, default, full, network or web
    #[arg(short, long, default_value = "default")]
    pub profile: ScanProfile,

    /// Override target type inference
    #[arg(long = "type")]
    pub target_type: Option<TargetType>,

    /// Run exactly these adapters instead of the profile's list
    #[arg(long, value_delimiter = ',')]
    pub adapters: Vec<String>,

    /// Exit with status 1 if any finding is at or above this severity
    #[arg(long, value_parser = parse_severity)]
    pub fail_on: Option<Severity>,

    /// Ignore cached adapter results
    #[arg(long)]
    pub no_cache: bool,
}

fn parse_severity(value: &str) -> Result<Severity, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "critical" | "high" | "medium" | "low" | "info" => Ok(Severity::from_label(value)),
        other => Err(format!(
            "unknown severity '{}' (expected critical, high, medium, low or info)",
            other
        )),
    }
}

impl ScanArgs {
    pub fn identity(&self) -> TargetIdentity {
        match self.target_type {
            Some(target_type) => TargetIdentity::new(target_type, self.target.as_str()),
            None => TargetIdentity::infer(self.target.as_str()),
        }
    }

    pub fn request(&self) -> ScanRequest {
        let request = ScanRequest::new(self.identity(), self.profile);
        if self.adapters.is_empty() {
            request
        } else {
            request.with_adapters(self.adapters.iter().map(|a| a.trim().to_string()))
        }
    }
}

/// Run the scan command
pub async fn run(ctx: &CliContext, args: &ScanArgs) -> Result<i32> {
    let mut config = ctx.config.clone();
    if args.no_cache {
        config.cache.enabled = false;
    }

    let request = args.request();
    let output = &ctx.output;
    output.header("Scan");
    output.info(&format!(
        "Target: {}  Profile: {}",
        request.target, request.profile
    ));

    let app = create_app(config).await?;
    let service = app.service.clone();

    let scan_id = match service.start_scan_with(request).await {
        Ok(id) => id,
        Err(ScanServiceError::UnknownAdapter(name)) => {
            output.error(&format!("Unknown adapter: {}", name));
            app.shutdown().await;
            return Ok(exit_codes::CONFIG_ERROR);
        }
        Err(e) => {
            app.shutdown().await;
            return Err(e.into());
        }
    };
    tracing::debug!(%scan_id, "Scan started");

    let mut subscription = service.subscribe(scan_id).await?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;
    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(event) => output.progress(&event),
                None => break,
            },
            result = &mut ctrl_c, if !cancel_requested => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                }
                output.warn("Cancelling scan, waiting for running adapters to stop");
                cancel_requested = true;
                service.cancel_scan(scan_id).await?;
            }
        }
    }

    let results = service.get_results(scan_id).await?;
    app.shutdown().await;

    render(output, &results)?;
    Ok(exit_code(&results, args.fail_on))
}

pub fn exit_code(results: &ScanResults, fail_on: Option<Severity>) -> i32 {
    match results.scan.status {
        ScanStatus::Failed => exit_codes::SCAN_FAILED,
        ScanStatus::Cancelled => exit_codes::CANCELLED,
        ScanStatus::Completed => match fail_on {
            Some(threshold) if results.findings.iter().any(|f| f.severity >= threshold) => {
                exit_codes::FINDINGS
            }
            _ => exit_codes::SUCCESS,
        },
        ScanStatus::Pending | ScanStatus::Running => exit_codes::INTERNAL_ERROR,
    }
}

fn render(output: &OutputWriter, results: &ScanResults) -> Result<()> {
    if output.format() == OutputFormat::Json {
        return output.json(results);
    }

    let scan = &results.scan;
    match &scan.failure {
        Some(reason) => output.line(&format!("Scan {} {}: {}", scan.id, scan.status, reason))?,
        None => output.line(&format!("Scan {} {}", scan.id, scan.status))?,
    }

    if !results.runs.is_empty() {
        output.line("")?;
        let rows: Vec<Vec<String>> = results
            .runs
            .iter()
            .map(|run| {
                vec![
                    run.adapter.clone(),
                    run.state.to_string(),
                    run.duration_ms
                        .map(|ms| format!("{:.1}s", ms as f64 / 1_000.0))
                        .unwrap_or_else(|| "-".to_string()),
                    run.finding_count.to_string(),
                    if run.cache_hit { "yes" } else { "" }.to_string(),
                    run.error.clone().unwrap_or_default(),
                ]
            })
            .collect();
        output.table(
            &["ADAPTER", "STATE", "TIME", "FINDINGS", "CACHED", "DETAIL"],
            &rows,
        )?;
    }

    if !results.findings.is_empty() {
        output.line("")?;
        let rows: Vec<Vec<String>> = results
            .findings
            .iter()
            .map(|finding| {
                let location = match (&finding.host, finding.port) {
                    (Some(host), Some(port)) => format!("{}:{}", host, port),
                    (Some(host), None) => host.clone(),
                    (None, Some(port)) => format!(":{}", port),
                    (None, None) => String::new(),
                };
                let mut reported_by = vec![finding.adapter.clone()];
                reported_by.extend(finding.corroborated_by.iter().cloned());
                vec![
                    finding.severity.to_string(),
                    finding.title.clone(),
                    location,
                    reported_by.join(","),
                ]
            })
            .collect();
        output.table(&["SEVERITY", "TITLE", "LOCATION", "ADAPTERS"], &rows)?;
    }

    if let Some(summary) = &results.summary {
        let counts = &summary.by_severity;
        output.line("")?;
        output.line(&format!(
            "{} findings (critical {}, high {}, medium {}, low {}, info {}); \
             {} succeeded, {} failed, {} timed out, {} skipped, {} cached",
            summary.total_findings,
            counts.critical,
            counts.high,
            counts.medium,
            counts.low,
            counts.info,
            summary.runs_succeeded,
            summary.runs_failed,
            summary.runs_timed_out,
            summary.runs_skipped,
            summary.cache_hits,
        ))?;
    }
    Ok(())
}
