//! Trivy filesystem adapter (dependencies, secrets, misconfigurations)

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

use vigil_core::domain::{
    AdapterConfig, AdapterDescriptor, AdapterError, DurationClass, FindingRecord, NormalizedResult,
    PriorityTier, ResourceProfile, ScannerAdapter, Severity, TargetIdentity, TargetType,
};

use crate::process::ToolRuntime;
use crate::secrets::secret_title;
use crate::target::{millis_since, repository_path};

pub const NAME: &str = "trivy";
pub const BINARY: &str = "trivy";

const DEFAULT_SCANNERS: &str = "vuln,secret,misconfig";

pub struct TrivyAdapter {
    descriptor: AdapterDescriptor,
    runtime: ToolRuntime,
}

impl TrivyAdapter {
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
        description: "Dependency vulnerabilities, secrets and misconfigurations".to_string(),
        target_types: vec![TargetType::Repository],
        extended_target_types: Vec::new(),
        default_tier: PriorityTier::High,
        resources: ResourceProfile::new(DurationClass::Minutes, 0.5, 0.5, true),
        binary: Some(BINARY.to_string()),
    }
}

#[async_trait]
impl ScannerAdapter for TrivyAdapter {
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
        let repo = repository_path(NAME, target)?;
        let scanners = config.option("scanners").unwrap_or(DEFAULT_SCANNERS);

        let output = self
            .runtime
            .command()
            .args(["fs", "--format", "json", "--quiet", "--scanners", scanners])
            .args(&config.extra_args)
            .arg(&repo)
            .run(&cancel, deadline)
            .await?;

        let findings = parse_output(&output.stdout).map_err(|e| {
            error!(stderr = %output.stderr, "Trivy produced unparseable output");
            AdapterError::failure(NAME, format!("unparseable output: {}", e))
        })?;
        debug!(finding_count = findings.len(), "Parsed trivy output");

        let version = self.runtime.version(&["--version"]).await;
        Ok(NormalizedResult::new(findings, millis_since(started)).with_tool_version(version))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyReport {
    #[serde(default)]
    results: Option<Vec<TrivyResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyResult {
    #[serde(default)]
    target: String,
    #[serde(default)]
    vulnerabilities: Option<Vec<Vulnerability>>,
    #[serde(default)]
    secrets: Option<Vec<Secret>>,
    #[serde(default)]
    misconfigurations: Option<Vec<Misconfiguration>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Vulnerability {
    #[serde(rename = "VulnerabilityID")]
    vulnerability_id: String,
    #[serde(default)]
    pkg_name: String,
    #[serde(default)]
    installed_version: String,
    #[serde(default)]
    fixed_version: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: String,
    #[serde(rename = "CVSS", default)]
    cvss: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Secret {
    #[serde(rename = "RuleID", default)]
    rule_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    start_line: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Misconfiguration {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Parse `trivy fs --format json` output.
pub fn parse_output(stdout: &str) -> Result<Vec<FindingRecord>, serde_json::Error> {
    let report: TrivyReport = serde_json::from_str(stdout)?;
    let mut findings = Vec::new();

    for result in report.results.unwrap_or_default() {
        for vuln in result.vulnerabilities.unwrap_or_default() {
            findings.push(vulnerability_finding(&result.target, vuln));
        }
        for secret in result.secrets.unwrap_or_default() {
            findings.push(
                FindingRecord::new(secret_title(&result.target, secret.start_line), Severity::High)
                    .with_description(format!(
                        "{} ({}) detected in {}:{}",
                        secret.title, secret.rule_id, result.target, secret.start_line
                    ))
                    .with_category("secret")
                    .with_remediation("Remove the secret from source and rotate the credential")
                    .with_raw(serde_json::json!({
                        "rule": secret.rule_id,
                        "file": result.target,
                        "line": secret.start_line,
                    })),
            );
        }
        for misconfig in result.misconfigurations.unwrap_or_default() {
            if misconfig.status.as_deref() == Some("PASS") {
                continue;
            }
            let mut finding = FindingRecord::new(
                format!("{}: {} in {}", misconfig.id, misconfig.title, result.target),
                Severity::from_label(&misconfig.severity),
            )
            .with_description(misconfig.description)
            .with_category("misconfiguration");
            if let Some(resolution) = misconfig.resolution {
                finding = finding.with_remediation(resolution);
            }
            findings.push(finding);
        }
    }
    Ok(findings)
}

fn vulnerability_finding(target: &str, vuln: Vulnerability) -> FindingRecord {
    let description = vuln
        .description
        .or(vuln.title)
        .unwrap_or_else(|| format!("{} affects {}", vuln.vulnerability_id, vuln.pkg_name));
    let cves = vuln
        .vulnerability_id
        .starts_with("CVE-")
        .then(|| vuln.vulnerability_id.clone());

    let mut finding = FindingRecord::new(
        format!(
            "{} in {}@{}",
            vuln.vulnerability_id, vuln.pkg_name, vuln.installed_version
        ),
        Severity::from_label(&vuln.severity),
    )
    .with_description(description)
    .with_category("dependency")
    .with_cves(cves)
    .with_raw(serde_json::json!({
        "package": vuln.pkg_name,
        "installed_version": vuln.installed_version,
        "fixed_version": vuln.fixed_version,
        "file": target,
    }));

    if let Some(score) = max_v3_score(vuln.cvss.as_ref()) {
        finding = finding.with_cvss(score);
    }
    if let Some(fixed) = vuln.fixed_version.filter(|v| !v.is_empty()) {
        finding = finding.with_remediation(format!("Upgrade {} to {}", vuln.pkg_name, fixed));
    }
    finding
}

/// Highest V3 score across the CVSS sources trivy reports (nvd, ghsa, vendor)
fn max_v3_score(cvss: Option<&serde_json::Map<String, serde_json::Value>>) -> Option<f64> {
    cvss?
        .values()
        .filter_map(|source| source.get("V3Score").and_then(serde_json::Value::as_f64))
        .fold(None, |max, score| match max {
            Some(m) if m >= score => Some(m),
            _ => Some(score),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "SchemaVersion": 2,
      "ArtifactName": "/repo",
      "Results": [
        {
          "Target": "Cargo.lock",
          "Class": "lang-pkgs",
          "Vulnerabilities": [
            {
              "VulnerabilityID": "CVE-2023-26964",
              "PkgName": "h2",
              "InstalledVersion": "0.3.15",
              "FixedVersion": "0.3.17",
              "Severity": "HIGH",
              "Title": "Resource exhaustion in h2",
              "CVSS": {"ghsa": {"V3Score": 7.5}, "nvd": {"V3Score": 5.3}}
            },
            {
              "VulnerabilityID": "RUSTSEC-2020-0071",
              "PkgName": "time",
              "InstalledVersion": "0.1.43",
              "Severity": "MEDIUM"
            }
          ]
        },
        {
          "Target": "deploy/.env",
          "Class": "secret",
          "Secrets": [
            {"RuleID": "aws-access-key-id", "Title": "AWS Access Key ID", "StartLine": 4, "Match": "AWS_KEY=****"}
          ]
        },
        {
          "Target": "Dockerfile",
          "Class": "config",
          "Misconfigurations": [
            {"ID": "DS002", "Title": "Image user should not be 'root'", "Description": "Running as root", "Severity": "HIGH", "Resolution": "Add USER", "Status": "FAIL"},
            {"ID": "DS001", "Title": "':latest' tag used", "Severity": "MEDIUM", "Status": "PASS"}
          ]
        }
      ]
    }"#;

    #[test]
    fn test_parse_all_result_classes() {
        let findings = parse_output(SAMPLE).unwrap();
        assert_eq!(findings.len(), 4);

        let h2 = &findings[0];
        assert_eq!(h2.title, "CVE-2023-26964 in h2@0.3.15");
        assert_eq!(h2.cve_ids, vec!["CVE-2023-26964".to_string()]);
        assert_eq!(h2.cvss_score, Some(7.5));
        assert_eq!(h2.remediation.as_deref(), Some("Upgrade h2 to 0.3.17"));
        assert_eq!(h2.category.as_deref(), Some("dependency"));

        let advisory = &findings[1];
        assert!(advisory.cve_ids.is_empty());
        assert!(advisory.remediation.is_none());
        assert_eq!(advisory.severity, Severity::Medium);

        assert_eq!(findings[2].title, "Secret exposed at deploy/.env:4");
        assert_eq!(
            findings[3].title,
            "DS002: Image user should not be 'root' in Dockerfile"
        );
    }

    #[test]
    fn test_clean_report() {
        assert!(parse_output(r#"{"SchemaVersion":2,"ArtifactName":"."}"#)
            .unwrap()
            .is_empty());
    }
}
