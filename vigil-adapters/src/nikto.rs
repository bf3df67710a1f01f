//! Nikto adapter (web server checks, JSON report file)

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use vigil_core::domain::{
    AdapterConfig, AdapterDescriptor, AdapterError, DurationClass, FindingRecord, NormalizedResult,
    PriorityTier, ResourceProfile, ScanProfile, ScannerAdapter, Severity, TargetIdentity,
    TargetType,
};

use crate::process::ToolRuntime;
use crate::target::{millis_since, web_url};

pub const NAME: &str = "nikto";
pub const BINARY: &str = "nikto";

pub struct NiktoAdapter {
    descriptor: AdapterDescriptor,
    runtime: ToolRuntime,
}

impl NiktoAdapter {
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
        description: "Web server misconfiguration and known-file checks".to_string(),
        target_types: vec![TargetType::Hostname, TargetType::Url],
        extended_target_types: vec![TargetType::Address],
        default_tier: PriorityTier::Background,
        resources: ResourceProfile::new(DurationClass::Long, 0.2, 0.2, true),
        binary: Some(BINARY.to_string()),
    }
}

#[async_trait]
impl ScannerAdapter for NiktoAdapter {
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
        let report = report_dir.path().join("nikto.json");

        let mut command = self
            .runtime
            .command()
            .args(["-h", url.as_str(), "-Format", "json", "-nointeractive", "-output"])
            .arg(&report)
            // nikto exits 1 when it reports anything
            .success_codes(&[0, 1]);
        if config.profile == ScanProfile::Quick {
            command = command.args(["-maxtime", "300s"]);
        }

        command
            .args(&config.extra_args)
            .run(&cancel, deadline)
            .await?;

        let raw = tokio::fs::read_to_string(&report).await.unwrap_or_default();
        let findings = parse_report(&raw, target.host().as_deref())
            .map_err(|e| AdapterError::failure(NAME, format!("unparseable report: {}", e)))?;
        debug!(finding_count = findings.len(), "Parsed nikto report");

        let version = self.runtime.version(&["-Version"]).await;
        Ok(NormalizedResult::new(findings, millis_since(started)).with_tool_version(version))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NiktoReport {
    Hosts(Vec<NiktoHost>),
    Host(NiktoHost),
}

#[derive(Debug, Deserialize)]
struct NiktoHost {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<serde_json::Value>,
    #[serde(default)]
    vulnerabilities: Vec<NiktoItem>,
}

#[derive(Debug, Deserialize)]
struct NiktoItem {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default, alias = "OSVDB")]
    osvdb: Option<serde_json::Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    msg: String,
}

/// Parse a nikto JSON report. An empty report means no findings.
pub fn parse_report(
    raw: &str,
    fallback_host: Option<&str>,
) -> Result<Vec<FindingRecord>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let hosts = match serde_json::from_str::<NiktoReport>(raw)? {
        NiktoReport::Hosts(hosts) => hosts,
        NiktoReport::Host(host) => vec![host],
    };

    let mut findings = Vec::new();
    for host in hosts {
        let host_name = host.host.clone().or_else(|| fallback_host.map(str::to_string));
        let port = host.port.as_ref().and_then(port_number);

        for item in host.vulnerabilities {
            let msg = item.msg.trim();
            if msg.is_empty() {
                continue;
            }
            let url = item.url.or(item.uri);
            let description = match &url {
                Some(url) => {
                    let method = item.method.as_deref().unwrap_or("GET");
                    format!("{} ({} {})", msg, method, url)
                }
                None => msg.to_string(),
            };
            // Nikto does not rate its findings.
            let mut finding = FindingRecord::new(msg, Severity::Medium)
                .with_description(description)
                .with_category("web-server")
                .with_raw(serde_json::json!({
                    "nikto_id": item.id,
                    "osvdb": item.osvdb,
                    "url": url,
                }));
            if let Some(h) = &host_name {
                finding = finding.with_host(h.clone());
            }
            if let Some(p) = port {
                finding = finding.with_port(p);
            }
            findings.push(finding);
        }
    }
    Ok(findings)
}

fn port_number(value: &serde_json::Value) -> Option<u16> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_host_report() {
        let raw = r#"{"host":"example.com","ip":"93.184.216.34","port":"443","vulnerabilities":[
            {"id":"999986","OSVDB":"0","method":"GET","url":"/","msg":"The anti-clickjacking X-Frame-Options header is not present."},
            {"id":"000726","method":"GET","url":"/admin/","msg":"/admin/: Admin login page found."},
            {"id":"1","msg":"  "}
        ]}"#;
        let findings = parse_report(raw, None).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].host.as_deref(), Some("example.com"));
        assert_eq!(findings[0].port, Some(443));
        assert!(findings[1].description.contains("GET /admin/"));
    }

    #[test]
    fn test_parse_multi_host_report_with_fallback_host() {
        let raw = r#"[{"port":80,"vulnerabilities":[{"msg":"Server leaks inodes via ETags"}]}]"#;
        let findings = parse_report(raw, Some("10.0.0.1")).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].host.as_deref(), Some("10.0.0.1"));
        assert_eq!(findings[0].port, Some(80));
    }

    #[test]
    fn test_empty_report_has_no_findings() {
        assert!(parse_report("", None).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_report_is_an_error() {
        assert!(parse_report("<html>", None).is_err());
    }
}
