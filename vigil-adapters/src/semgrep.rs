//! Semgrep adapter (static analysis, `--json` on stdout)

use std::path::Path;
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
use crate::target::{millis_since, repository_path};

pub const NAME: &str = "semgrep";
pub const BINARY: &str = "semgrep";

/// Rule configuration used when none is configured
const DEFAULT_RULESET: &str = "auto";

pub struct SemgrepAdapter {
    descriptor: AdapterDescriptor,
    runtime: ToolRuntime,
}

impl SemgrepAdapter {
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
        description: "Static analysis for insecure code patterns".to_string(),
        target_types: vec![TargetType::Repository],
        extended_target_types: Vec::new(),
        default_tier: PriorityTier::High,
        resources: ResourceProfile::new(DurationClass::Minutes, 0.7, 0.6, false),
        binary: Some(BINARY.to_string()),
    }
}

#[async_trait]
impl ScannerAdapter for SemgrepAdapter {
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
        let ruleset = config.option("config").unwrap_or(DEFAULT_RULESET);

        let output = self
            .runtime
            .command()
            .args(["scan", "--json", "--quiet", "--metrics=off", "--config", ruleset])
            .args(&config.extra_args)
            .arg(&repo)
            // 1 means findings were reported with --error
            .success_codes(&[0, 1])
            .run(&cancel, deadline)
            .await?;

        let findings = parse_output(&output.stdout, &repo).map_err(|e| {
            error!(stderr = %output.stderr, "Semgrep produced unparseable output");
            AdapterError::failure(NAME, format!("unparseable output: {}", e))
        })?;
        debug!(finding_count = findings.len(), "Parsed semgrep output");

        let version = self.runtime.version(&["--version"]).await;
        Ok(NormalizedResult::new(findings, millis_since(started)).with_tool_version(version))
    }
}

#[derive(Debug, Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResult>,
}

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    check_id: String,
    path: String,
    start: Position,
    #[serde(default)]
    extra: Extra,
}

#[derive(Debug, Deserialize)]
struct Position {
    line: u32,
}

#[derive(Debug, Default, Deserialize)]
struct Extra {
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    fix: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Parse `semgrep --json` output.
pub fn parse_output(stdout: &str, repo: &Path) -> Result<Vec<FindingRecord>, serde_json::Error> {
    let output: SemgrepOutput = serde_json::from_str(stdout)?;

    Ok(output
        .results
        .into_iter()
        .map(|result| {
            let path = Path::new(&result.path)
                .strip_prefix(repo)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or(result.path.clone());
            let rule = result.check_id.rsplit('.').next().unwrap_or(&result.check_id);

            let mut finding = FindingRecord::new(
                format!("{} at {}:{}", rule, path, result.start.line),
                Severity::from_label(&result.extra.severity),
            )
            .with_description(result.extra.message.trim())
            .with_category("code")
            .with_raw(serde_json::json!({
                "check_id": result.check_id,
                "path": path,
                "line": result.start.line,
                "metadata": result.extra.metadata,
            }));
            if let Some(fix) = result.extra.fix {
                finding = finding.with_remediation(format!("Suggested fix: {}", fix));
            }
            finding
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results() {
        let raw = r#"{"results":[
            {"check_id":"python.lang.security.audit.eval-detected.eval-detected","path":"/repo/app/views.py","start":{"line":42,"col":5},"end":{"line":42,"col":20},"extra":{"message":"Detected the use of eval().","severity":"WARNING","metadata":{"cwe":["CWE-95"]}}},
            {"check_id":"python.flask.security.injection.tainted-sql-string","path":"app/db.py","start":{"line":7,"col":1},"end":{"line":7,"col":30},"extra":{"message":"SQL built from user input","severity":"ERROR","fix":"use parameters"}}
        ],"errors":[]}"#;
        let findings = parse_output(raw, Path::new("/repo")).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].title, "eval-detected at app/views.py:42");
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[1].severity, Severity::High);
        assert_eq!(
            findings[1].remediation.as_deref(),
            Some("Suggested fix: use parameters")
        );
    }

    #[test]
    fn test_invalid_output_is_an_error() {
        assert!(parse_output("Traceback (most recent call last)", Path::new("/")).is_err());
    }
}
