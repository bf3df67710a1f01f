//! Nuclei adapter (template-based web checks, JSON lines on stdout)

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use vigil_core::domain::{
    AdapterConfig, AdapterDescriptor, AdapterError, DurationClass, FindingRecord, NormalizedResult,
    PriorityTier, ResourceProfile, ScanProfile, ScannerAdapter, Severity, TargetIdentity,
    TargetType,
};

use crate::process::ToolRuntime;
use crate::target::{millis_since, web_url};

pub const NAME: &str = "nuclei";
pub const BINARY: &str = "nuclei";

pub struct NucleiAdapter {
    descriptor: AdapterDescriptor,
    runtime: ToolRuntime,
}

impl NucleiAdapter {
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
        description: "Template-based vulnerability checks for web targets".to_string(),
        target_types: vec![TargetType::Hostname, TargetType::Url],
        extended_target_types: vec![TargetType::Address],
        default_tier: PriorityTier::Standard,
        resources: ResourceProfile::new(DurationClass::Minutes, 0.4, 0.3, true),
        binary: Some(BINARY.to_string()),
    }
}

#[async_trait]
impl ScannerAdapter for NucleiAdapter {
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

        let mut command = self.runtime.command().args([
            "-u",
            url.as_str(),
            "-jsonl",
            "-silent",
            "-disable-update-check",
            "-no-color",
        ]);
        if config.profile == ScanProfile::Quick {
            command = command.args(["-severity", "critical,high,medium"]);
        }
        if let Some(tags) = config.option("tags") {
            command = command.args(["-tags", tags]);
        }

        let output = command
            .args(&config.extra_args)
            .run(&cancel, deadline)
            .await?;

        let findings = parse_output(&output.stdout);
        debug!(finding_count = findings.len(), "Parsed nuclei output");

        let version = self.runtime.version(&["-version"]).await;
        Ok(NormalizedResult::new(findings, millis_since(started)).with_tool_version(version))
    }
}

#[derive(Debug, Deserialize)]
struct NucleiResult {
    #[serde(rename = "template-id", default)]
    template_id: String,
    #[serde(default)]
    info: NucleiInfo,
    #[serde(rename = "matched-at", default)]
    matched_at: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NucleiInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    remediation: Option<String>,
    #[serde(default)]
    reference: Option<serde_json::Value>,
    #[serde(default)]
    classification: Option<NucleiClassification>,
}

#[derive(Debug, Default, Deserialize)]
struct NucleiClassification {
    #[serde(rename = "cve-id", default)]
    cve_id: Option<serde_json::Value>,
    #[serde(rename = "cvss-score", default)]
    cvss_score: Option<f64>,
}

/// Parse nuclei `-jsonl` output. Lines that are not JSON results are skipped.
pub fn parse_output(stdout: &str) -> Vec<FindingRecord> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| match serde_json::from_str::<NucleiResult>(line) {
            Ok(result) => Some(to_finding(result)),
            Err(e) => {
                warn!(error = %e, "Skipping malformed nuclei result line");
                None
            }
        })
        .collect()
}

fn to_finding(result: NucleiResult) -> FindingRecord {
    let info = result.info;
    let title = if info.name.is_empty() {
        result.template_id.clone()
    } else {
        info.name.clone()
    };

    let mut finding = FindingRecord::new(title, Severity::from_label(&info.severity))
        .with_description(info.description.clone().unwrap_or_default().trim())
        .with_category("web-vulnerability")
        .with_raw(serde_json::json!({
            "template_id": result.template_id,
            "matched_at": result.matched_at,
            "reference": info.reference,
        }));

    if let Some(classification) = info.classification {
        finding = finding.with_cves(string_list(classification.cve_id));
        if let Some(score) = classification.cvss_score {
            finding = finding.with_cvss(score);
        }
    }
    if let Some(remediation) = info.remediation {
        finding = finding.with_remediation(remediation.trim());
    }
    if let Some(host) = result.host.as_deref().and_then(host_of) {
        finding = finding.with_host(host);
    }
    if let Some(port) = result.port.and_then(|p| p.parse().ok()) {
        finding = finding.with_port(port);
    }
    finding
}

/// Nuclei reports `host` either bare or as a URL.
fn host_of(value: &str) -> Option<String> {
    let rest = value.split_once("://").map(|(_, r)| r).unwrap_or(value);
    let authority = rest.split('/').next()?;
    let host = authority.rsplit_once(':').map(|(h, _)| h).unwrap_or(authority);
    (!host.is_empty()).then(|| host.to_string())
}

fn string_list(value: Option<serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(s)) => vec![s.to_uppercase()],
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_uppercase))
            .collect(),
        _ => Vec::new(),
    }
}
