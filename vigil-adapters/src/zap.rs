//! OWASP ZAP adapter (command-line quick scan, JSON report file)

use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use vigil_core::domain::{
    AdapterConfig, AdapterDescriptor, AdapterError, DurationClass, FindingRecord, NormalizedResult,
    PriorityTier, ResourceProfile, ScannerAdapter, Severity, TargetIdentity, TargetType,
};

use crate::process::ToolRuntime;
use crate::target::{millis_since, web_url};

pub const NAME: &str = "zap";
pub const BINARY: &str = "zap.sh";

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

pub struct ZapAdapter {
    descriptor: AdapterDescriptor,
    runtime: ToolRuntime,
}

impl ZapAdapter {
    pub fn new(runtime: ToolRuntime) -> Self {
        Self {
            descriptor: descriptor(),
            runtime,
        }
    }
}

pub fn descriptor() -> AdapterDescriptor {
    AdapterDescriptor {
        name: NAME.to_string(),
        description: "OWASP ZAP spider and active scan".to_string(),
        target_types: vec![TargetType::Hostname, TargetType::Url],
        extended_target_types: vec![TargetType::Address],
        default_tier: PriorityTier::Background,
        resources: ResourceProfile::new(DurationClass::Long, 0.6, 0.7, true),
        binary: Some(BINARY.to_string()),
    }
}

#[async_trait]
impl ScannerAdapter for ZapAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.runtime.is_available()
    }

    #[instrument(skip_all, fields(adapter = NAME, target = %target))]
    async fn run(
        &self,
        target: &TargetIdentity,
        config: &AdapterConfig,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> Result<NormalizedResult, AdapterError> {
        let started = Instant::now();
        let url = web_url(NAME, target)?;

        let report_dir = tempfile::tempdir()
            .map_err(|e| AdapterError::failure(NAME, format!("cannot create report dir: {}", e)))?;
        let report = report_dir.path().join("zap.json");

        self.runtime
            .command()
            .args(["-cmd", "-quickurl", url.as_str(), "-quickout"])
            .arg(&report)
            .args(&config.extra_args)
            .run(&cancel, deadline)
            .await?;

        let raw = tokio::fs::read_to_string(&report).await.map_err(|e| {
            AdapterError::failure(NAME, format!("report was not written: {}", e))
        })?;
        let findings = parse_report(&raw)
            .map_err(|e| AdapterError::failure(NAME, format!("unparseable report: {}", e)))?;
        debug!(finding_count = findings.len(), "Parsed ZAP report");

        let version = self.runtime.version(&["-version"]).await;
        Ok(NormalizedResult::new(findings, millis_since(started)).with_tool_version(version))
    }
}

#[derive(Debug, Deserialize)]
struct ZapReport {
    #[serde(default)]
    site: Vec<ZapSite>,
}

#[derive(Debug, Deserialize)]
struct ZapSite {
    #[serde(rename = "@host", default)]
    host: Option<String>,
    #[serde(rename = "@port", default)]
    port: Option<String>,
    #[serde(default)]
    alerts: Vec<ZapAlert>,
}

#[derive(Debug, Deserialize)]
struct ZapAlert {
    #[serde(default)]
    name: String,
    /// Older reports only carry `alert`
    #[serde(default)]
    alert: Option<String>,
    #[serde(default)]
    riskdesc: String,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    solution: String,
    #[serde(default)]
    cweid: Option<String>,
    #[serde(default)]
    pluginid: Option<String>,
    #[serde(default)]
    count: Option<String>,
}

/// Parse a ZAP traditional JSON report.
pub fn parse_report(raw: &str) -> Result<Vec<FindingRecord>, serde_json::Error> {
    let report: ZapReport = serde_json::from_str(raw)?;
    let mut findings = Vec::new();

    for site in report.site {
        let port = site.port.as_deref().and_then(|p| p.parse::<u16>().ok());
        for alert in site.alerts {
            let title = match alert.alert.as_deref() {
                Some(fallback) if alert.name.trim().is_empty() => fallback.trim().to_string(),
                _ => alert.name.trim().to_string(),
            };
            let mut finding = FindingRecord::new(title, Severity::from_label(&alert.riskdesc))
                .with_description(strip_html(&alert.desc))
                .with_category("web-vulnerability")
                .with_raw(serde_json::json!({
                    "riskdesc": alert.riskdesc,
                    "cweid": alert.cweid,
                    "pluginid": alert.pluginid,
                    "instances": alert.count,
                }));
            let solution = strip_html(&alert.solution);
            if !solution.is_empty() {
                finding = finding.with_remediation(solution);
            }
            if let Some(host) = &site.host {
                finding = finding.with_host(host.clone());
            }
            if let Some(port) = port {
                finding = finding.with_port(port);
            }
            findings.push(finding);
        }
    }
    Ok(findings)
}

fn strip_html(text: &str) -> String {
    HTML_TAG.replace_all(text, " ").split_whitespace().collect::<Vec<_>>().join(" ")
}
