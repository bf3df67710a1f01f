//! Nmap adapter
//!
//! Runs a service-detection scan with XML output on stdout and reports open
//! ports (severity from a port/service risk table) plus findings from NSE
//! vulnerability scripts.

use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use vigil_core::domain::{
    AdapterConfig, AdapterDescriptor, AdapterError, DurationClass, FindingRecord, NormalizedResult,
    PriorityTier, ResourceProfile, ScanProfile, ScannerAdapter, Severity, TargetIdentity,
    TargetType,
};

use crate::process::ToolRuntime;
use crate::target::{millis_since, network_target};

pub const NAME: &str = "nmap";
pub const BINARY: &str = "nmap";

static CVE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CVE-\d{4}-\d+").expect("valid CVE regex"));

/// Ports that expose remote administration or legacy plaintext protocols.
const HIGH_RISK_PORTS: &[u16] = &[23, 445, 1433, 3306, 3389, 5432, 5900];
const HIGH_RISK_SERVICES: &[&str] = &["telnet", "ftp", "smb", "microsoft-ds", "rdp", "ms-wbt-server", "vnc"];
const MEDIUM_RISK_PORTS: &[u16] = &[21, 25, 110, 139, 143, 161, 8080];

pub struct NmapAdapter {
    descriptor: AdapterDescriptor,
    runtime: ToolRuntime,
}

impl NmapAdapter {
    pub fn new(runtime: ToolRuntime) -> Self {
        Self {
            descriptor: descriptor(),
            runtime,
        }
    }

    fn profile_args(profile: ScanProfile) -> &'static [&'static str] {
        match profile {
            ScanProfile::Quick | ScanProfile::Web => &["-T4", "-F"],
            ScanProfile::Default => &["-T3"],
            ScanProfile::Network => &["-T3", "--script", "vuln"],
            ScanProfile::Full => &["-p-", "-T4", "--script", "vuln"],
        }
    }
}

pub fn descriptor() -> AdapterDescriptor {
    AdapterDescriptor {
        name: NAME.to_string(),
        description: "Port and service discovery with NSE vulnerability scripts".to_string(),
        target_types: vec![
            TargetType::Address,
            TargetType::Hostname,
            TargetType::NetworkRange,
        ],
        extended_target_types: vec![TargetType::Url],
        default_tier: PriorityTier::Standard,
        resources: ResourceProfile::new(DurationClass::Minutes, 0.3, 0.2, true),
        binary: Some(BINARY.to_string()),
    }
}

#[async_trait]
impl ScannerAdapter for NmapAdapter {
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
        let host = network_target(NAME, target)?;

        let mut command = self
            .runtime
            .command()
            .args(Self::profile_args(config.profile))
            .arg("-sV");
        if let Some(ports) = config.option("ports") {
            command = command.args(["-p", ports]);
        }
        let output = command
            .args(&config.extra_args)
            .args(["-oX", "-"])
            .arg(&host)
            .run(&cancel, deadline)
            .await?;

        let findings = parse_output(&output.stdout)
            .map_err(|e| AdapterError::failure(NAME, format!("unparseable XML output: {}", e)))?;
        debug!(finding_count = findings.len(), "Parsed nmap output");

        let version = self.runtime.version(&["--version"]).await;
        Ok(NormalizedResult::new(findings, millis_since(started)).with_tool_version(version))
    }
}

/// Severity of an open port from its number and detected service.
pub fn port_severity(port: u16, service: &str) -> Severity {
    let service = service.to_ascii_lowercase();
    if HIGH_RISK_PORTS.contains(&port) || HIGH_RISK_SERVICES.contains(&service.as_str()) {
        Severity::High
    } else if MEDIUM_RISK_PORTS.contains(&port) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Severity of an NSE script result from its output text.
fn script_severity(output: &str) -> Severity {
    let upper = output.to_ascii_uppercase();
    if upper.contains("VULNERABLE") || upper.contains("CRITICAL") {
        Severity::High
    } else if upper.contains("CVE") {
        Severity::Medium
    } else if upper.contains("LOW") {
        Severity::Low
    } else {
        Severity::Medium
    }
}

#[derive(Default)]
struct PortState {
    id: u16,
    protocol: String,
    open: bool,
    service: String,
    product: String,
    version: String,
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Parse `nmap -oX` output into findings.
pub fn parse_output(xml: &str) -> Result<Vec<FindingRecord>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut findings = Vec::new();
    let mut host: Option<String> = None;
    let mut port: Option<PortState> = None;
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        let (element, is_empty) = match &event {
            Event::Start(e) => (Some(e.clone().into_owned()), false),
            Event::Empty(e) => (Some(e.clone().into_owned()), true),
            Event::End(e) => {
                match e.name().as_ref() {
                    b"host" => host = None,
                    b"port" => {
                        if let Some(p) = port.take().filter(|p| p.open) {
                            findings.push(open_port_finding(&p, host.as_deref()));
                        }
                    }
                    _ => {}
                }
                (None, false)
            }
            Event::Eof => break,
            _ => (None, false),
        };

        if let Some(e) = element {
            match e.name().as_ref() {
                b"address" => {
                    let addrtype = attr(&e, "addrtype").unwrap_or_default();
                    if host.is_none() && addrtype != "mac" {
                        host = attr(&e, "addr");
                    }
                }
                b"port" => {
                    port = Some(PortState {
                        id: attr(&e, "portid").and_then(|p| p.parse().ok()).unwrap_or(0),
                        protocol: attr(&e, "protocol").unwrap_or_else(|| "tcp".into()),
                        ..Default::default()
                    });
                    if is_empty {
                        port = None;
                    }
                }
                b"state" => {
                    if let Some(p) = port.as_mut() {
                        p.open = attr(&e, "state").as_deref() == Some("open");
                    }
                }
                b"service" => {
                    if let Some(p) = port.as_mut() {
                        p.service = attr(&e, "name").unwrap_or_else(|| "unknown".into());
                        p.product = attr(&e, "product").unwrap_or_default();
                        p.version = attr(&e, "version").unwrap_or_default();
                    }
                }
                b"script" => {
                    let id = attr(&e, "id").unwrap_or_else(|| "unknown".into());
                    let output = attr(&e, "output").unwrap_or_default();
                    if let Some(f) = script_finding(&id, &output, host.as_deref(), port.as_ref()) {
                        findings.push(f);
                    }
                }
                _ => {}
            }
        }
        buf.clear();
    }

    Ok(findings)
}

fn open_port_finding(port: &PortState, host: Option<&str>) -> FindingRecord {
    let mut service_info = port.service.clone();
    if !port.product.is_empty() {
        service_info.push_str(&format!(" ({}", port.product));
        if !port.version.is_empty() {
            service_info.push_str(&format!(" {}", port.version));
        }
        service_info.push(')');
    }

    let mut finding = FindingRecord::new(
        format!("Open port {}/{}", port.id, port.protocol),
        port_severity(port.id, &port.service),
    )
    .with_description(format!(
        "Port {}/{} is open - Service: {}",
        port.id, port.protocol, service_info
    ))
    .with_category("open-port")
    .with_port(port.id)
    .with_raw(serde_json::json!({
        "service": port.service,
        "product": port.product,
        "version": port.version,
    }));
    if let Some(host) = host {
        finding = finding.with_host(host);
    }
    finding
}

fn script_finding(
    id: &str,
    output: &str,
    host: Option<&str>,
    port: Option<&PortState>,
) -> Option<FindingRecord> {
    if !id.contains("vuln") && !output.contains("CVE") {
        return None;
    }

    let mut cves: Vec<String> = CVE_PATTERN
        .find_iter(output)
        .map(|m| m.as_str().to_string())
        .collect();
    cves.sort();
    cves.dedup();

    let mut finding = FindingRecord::new(format!("NSE script: {}", id), script_severity(output))
        .with_description(output.trim())
        .with_category("network-vulnerability")
        .with_cves(cves);
    if let Some(host) = host {
        finding = finding.with_host(host);
    }
    if let Some(port) = port {
        finding = finding.with_port(port.id);
    }
    Some(finding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap" args="nmap -sV -oX - 10.0.0.5">
  <host>
    <status state="up" reason="syn-ack"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <address addr="00:11:22:33:44:55" addrtype="mac"/>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="8.9p1"/>
      </port>
      <port protocol="tcp" portid="3389">
        <state state="open" reason="syn-ack"/>
        <service name="ms-wbt-server"/>
      </port>
      <port protocol="tcp" portid="8080">
        <state state="closed" reason="reset"/>
        <service name="http-proxy"/>
      </port>
      <port protocol="tcp" portid="445">
        <state state="open" reason="syn-ack"/>
        <service name="microsoft-ds"/>
        <script id="smb-vuln-ms17-010" output="VULNERABLE: Remote Code Execution (CVE-2017-0143)&#xa;State: VULNERABLE"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;

    #[test]
    fn test_parse_open_ports_only() {
        let findings = parse_output(SAMPLE).unwrap();
        let ports: Vec<_> = findings
            .iter()
            .filter(|f| f.category.as_deref() == Some("open-port"))
            .map(|f| f.port.unwrap())
            .collect();
        assert_eq!(ports, vec![22, 3389, 445]);
    }

    #[test]
    fn test_parse_service_description_and_host() {
        let findings = parse_output(SAMPLE).unwrap();
        let ssh = &findings[0];
        assert_eq!(ssh.title, "Open port 22/tcp");
        assert_eq!(ssh.description, "Port 22/tcp is open - Service: ssh (OpenSSH 8.9p1)");
        assert_eq!(ssh.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(ssh.severity, Severity::Low);
    }

    #[test]
    fn test_parse_vuln_script_extracts_cves() {
        let findings = parse_output(SAMPLE).unwrap();
        let script = findings
            .iter()
            .find(|f| f.title.starts_with("NSE script"))
            .unwrap();
        assert_eq!(script.cve_ids, vec!["CVE-2017-0143".to_string()]);
        assert_eq!(script.severity, Severity::High);
        assert_eq!(script.port, Some(445));
    }

    #[test]
    fn test_parse_empty_run() {
        let findings = parse_output(r#"<nmaprun><runstats/></nmaprun>"#).unwrap();
        assert!(findings.is_empty());
    }

    #[rstest]
    #[case(23, "telnet", Severity::High)]
    #[case(2323, "telnet", Severity::High)]
    #[case(3306, "mysql", Severity::High)]
    #[case(21, "ftp", Severity::High)]
    #[case(25, "smtp", Severity::Medium)]
    #[case(8080, "http-proxy", Severity::Medium)]
    #[case(443, "https", Severity::Low)]
    fn test_port_severity(#[case] port: u16, #[case] service: &str, #[case] expected: Severity) {
        assert_eq!(port_severity(port, service), expected);
    }

    #[test]
    fn test_script_without_vuln_markers_is_ignored() {
        assert!(script_finding("http-title", "Welcome page", None, None).is_none());
    }
}
