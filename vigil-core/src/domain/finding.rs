//! Findings, severities and normalized adapter output

use std::fmt;

use serde::{Deserialize, Serialize};

use super::scan::ScanId;

/// Finding severity, totally ordered: `Critical > High > Medium > Low > Info`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a tool's severity vocabulary onto the five-level scale.
    ///
    /// Only the first word is considered, so ZAP risk descriptions such as
    /// `"High (Confidence: Medium)"` map to `High`. Unknown labels are `Info`.
    pub fn from_label(label: &str) -> Self {
        let word = label
            .split(|c: char| c.is_whitespace() || c == '(')
            .find(|w| !w.is_empty())
            .unwrap_or("")
            .to_ascii_lowercase();

        match word.as_str() {
            "critical" | "crit" => Self::Critical,
            "high" | "error" => Self::High,
            "medium" | "moderate" | "warning" | "warn" => Self::Medium,
            "low" | "note" => Self::Low,
            _ => Self::Info,
        }
    }

    /// CVSS v3 qualitative rating bands.
    pub fn from_cvss(score: f64) -> Self {
        if score >= 9.0 {
            Self::Critical
        } else if score >= 7.0 {
            Self::High
        } else if score >= 4.0 {
            Self::Medium
        } else if score > 0.0 {
            Self::Low
        } else {
            Self::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding-shaped record emitted by an adapter, before aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRecord {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    /// Coarse kind used when matching findings across tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cve_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl FindingRecord {
    pub fn new(title: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            severity,
            category: None,
            cve_ids: Vec::new(),
            cvss_score: None,
            host: None,
            port: None,
            remediation: None,
            raw: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_cves(mut self, cves: impl IntoIterator<Item = String>) -> Self {
        self.cve_ids.extend(cves);
        self
    }

    pub fn with_cvss(mut self, score: f64) -> Self {
        self.cvss_score = Some(score);
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Severity after normalization: a positive CVSS score decides.
    ///
    /// Tools report 0.0 when they have no score, so that keeps the label.
    pub fn effective_severity(&self) -> Severity {
        match self.cvss_score {
            Some(score) if score.is_finite() && score > 0.0 => Severity::from_cvss(score),
            _ => self.severity,
        }
    }
}

/// Output of one adapter run in the common schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub findings: Vec<FindingRecord>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
}

impl NormalizedResult {
    pub fn new(findings: Vec<FindingRecord>, duration_ms: u64) -> Self {
        Self {
            findings,
            duration_ms,
            tool_version: None,
        }
    }

    pub fn with_tool_version(mut self, version: Option<String>) -> Self {
        self.tool_version = version;
        self
    }
}

/// Aggregated finding owned by a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable id derived from the scan and the dedup key
    pub id: String,
    pub scan_id: ScanId,
    pub adapter: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cve_ids: Vec<String>,
    pub cvss_score: Option<f64>,
    pub remediation: Option<String>,
    pub raw: Option<serde_json::Value>,
    /// Other adapters that reported the same issue
    #[serde(default)]
    pub corroborated_by: Vec<String>,
}

/// Finding totals per severity level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

/// Scan summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub by_severity: SeverityCounts,
    pub total_findings: usize,
    /// Sum of adapter run durations
    pub total_runtime_ms: u64,
    pub runs_succeeded: usize,
    pub runs_failed: usize,
    pub runs_timed_out: usize,
    pub runs_cancelled: usize,
    pub runs_skipped: usize,
    pub cache_hits: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[rstest]
    #[case("CRITICAL", Severity::Critical)]
    #[case("high", Severity::High)]
    #[case("High (Confidence: Medium)", Severity::High)]
    #[case("Informational (Confidence: Low)", Severity::Info)]
    #[case("MODERATE", Severity::Medium)]
    #[case("WARNING", Severity::Medium)]
    #[case("ERROR", Severity::High)]
    #[case("low", Severity::Low)]
    #[case("UNKNOWN", Severity::Info)]
    #[case("", Severity::Info)]
    fn test_severity_from_label(#[case] label: &str, #[case] expected: Severity) {
        assert_eq!(Severity::from_label(label), expected);
    }

    #[rstest]
    #[case(9.8, Severity::Critical)]
    #[case(9.0, Severity::Critical)]
    #[case(7.5, Severity::High)]
    #[case(4.0, Severity::Medium)]
    #[case(3.9, Severity::Low)]
    #[case(0.0, Severity::Info)]
    fn test_severity_from_cvss(#[case] score: f64, #[case] expected: Severity) {
        assert_eq!(Severity::from_cvss(score), expected);
    }

    #[test]
    fn test_cvss_overrides_tool_severity() {
        let record = FindingRecord::new("Outdated OpenSSL", Severity::Low).with_cvss(9.1);
        assert_eq!(record.effective_severity(), Severity::Critical);

        let record = FindingRecord::new("Banner", Severity::Medium);
        assert_eq!(record.effective_severity(), Severity::Medium);
    }

    #[rstest]
    #[case(Severity::Critical)]
    #[case(Severity::High)]
    #[case(Severity::Low)]
    fn test_zero_cvss_keeps_tool_severity(#[case] label: Severity) {
        let record = FindingRecord::new("SQL injection in /login", label).with_cvss(0.0);
        assert_eq!(record.effective_severity(), label);
    }

    #[test]
    fn test_severity_counts() {
        let mut counts = SeverityCounts::default();
        counts.record(Severity::High);
        counts.record(Severity::High);
        counts.record(Severity::Info);
        assert_eq!(counts.high, 2);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_finding_record_skips_empty_optionals() {
        let json = serde_json::to_value(FindingRecord::new("x", Severity::Low)).unwrap();
        assert!(json.get("cve_ids").is_none());
        assert!(json.get("port").is_none());
        assert_eq!(json["severity"], "low");
    }
}
