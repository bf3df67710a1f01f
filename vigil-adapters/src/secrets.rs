//! Built-in secret pattern scanner
//!
//! Walks a local repository and matches each text line against a fixed set of
//! credential patterns. Needs no external binary, so it is always available.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use walkdir::{DirEntry, WalkDir};

use vigil_core::domain::{
    AdapterConfig, AdapterDescriptor, AdapterError, DurationClass, FindingRecord, NormalizedResult,
    PriorityTier, ResourceProfile, ScannerAdapter, Severity, TargetIdentity, TargetType,
};

use crate::target::{millis_since, repository_path};

pub const NAME: &str = "secrets";

/// Files larger than this are not read
const MAX_FILE_SIZE: u64 = 1024 * 1024;
/// Prefix inspected for NUL bytes when deciding whether a file is binary
const BINARY_SNIFF_LEN: usize = 8 * 1024;

const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "venv",
    ".venv",
    "__pycache__",
    "target",
    "dist",
    "build",
];

struct SecretPattern {
    rule: &'static str,
    description: &'static str,
    regex: Regex,
}

static PATTERNS: Lazy<Vec<SecretPattern>> = Lazy::new(|| {
    [
        (
            "aws-access-key",
            "AWS access key ID",
            r"AKIA[0-9A-Z]{16}",
        ),
        (
            "generic-api-key",
            "Hardcoded API key",
            r#"['"]?[a-zA-Z0-9_-]*[kK][eE][yY]['"]?\s*[:=]\s*['"][0-9a-zA-Z_-]{16,}['"]"#,
        ),
        (
            "hardcoded-password",
            "Hardcoded password",
            r#"(?i)password['"]?\s*[:=]\s*['"][^'"\s]{8,}['"]"#,
        ),
        (
            "hardcoded-token",
            "Hardcoded token",
            r#"(?i)token['"]?\s*[:=]\s*['"][0-9a-zA-Z_.-]{16,}['"]"#,
        ),
        (
            "private-key",
            "Private key block",
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----",
        ),
    ]
    .into_iter()
    .map(|(rule, description, pattern)| SecretPattern {
        rule,
        description,
        regex: Regex::new(pattern).expect("valid secret pattern"),
    })
    .collect()
});

/// Title shared by every adapter that reports exposed secrets, so that the
/// aggregator can merge the same leak reported by different tools.
pub fn secret_title(file: &str, line: u32) -> String {
    format!("Secret exposed at {}:{}", file, line)
}

pub struct SecretsAdapter {
    descriptor: AdapterDescriptor,
}

impl SecretsAdapter {
    pub fn new() -> Self {
        Self {
            descriptor: descriptor(),
        }
    }
}

impl Default for SecretsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn descriptor() -> AdapterDescriptor {
    AdapterDescriptor {
        name: NAME.to_string(),
        description: "Built-in credential pattern scan of repository files".to_string(),
        target_types: vec![TargetType::Repository],
        extended_target_types: Vec::new(),
        default_tier: PriorityTier::Critical,
        resources: ResourceProfile::new(DurationClass::Seconds, 0.2, 0.1, false),
        binary: None,
    }
}

#[async_trait]
impl ScannerAdapter for SecretsAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(adapter = NAME, target = %target))]
    async fn run(
        &self,
        target: &TargetIdentity,
        _config: &AdapterConfig,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> Result<NormalizedResult, AdapterError> {
        let started = Instant::now();
        let repo = repository_path(NAME, target)?;

        let findings = tokio::task::spawn_blocking(move || scan_tree(&repo, &cancel, deadline))
            .await
            .map_err(|e| AdapterError::failure(NAME, format!("scan task failed: {}", e)))??;
        debug!(finding_count = findings.len(), "Secret scan completed");

        Ok(NormalizedResult::new(findings, millis_since(started)))
    }
}

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

/// Scan every eligible file below `root`, checking cancellation and the
/// deadline between files.
pub fn scan_tree(
    root: &Path,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<Vec<FindingRecord>, AdapterError> {
    let started = Instant::now();
    let mut findings = Vec::new();

    let files = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_excluded(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file());

    for entry in files {
        if cancel.is_cancelled() {
            return Err(AdapterError::cancelled(NAME));
        }
        if Instant::now() >= deadline {
            return Err(AdapterError::timed_out(NAME, started.elapsed()));
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
        if size > MAX_FILE_SIZE {
            trace!(file = %entry.path().display(), size, "Skipping large file");
            continue;
        }
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        if bytes.iter().take(BINARY_SNIFF_LEN).any(|b| *b == 0) {
            continue;
        }

        let relative = relative_path(root, entry.path());
        findings.extend(scan_content(&relative, &String::from_utf8_lossy(&bytes)));
    }

    Ok(findings)
}

/// Match every line of `content` against the secret patterns. At most one
/// finding is produced per line.
pub fn scan_content(file: &str, content: &str) -> Vec<FindingRecord> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let pattern = PATTERNS.iter().find(|p| p.regex.is_match(line))?;
            let line_number = index as u32 + 1;
            Some(
                FindingRecord::new(secret_title(file, line_number), Severity::High)
                    .with_description(format!(
                        "{} ({}) detected in {}:{}",
                        pattern.description, pattern.rule, file, line_number
                    ))
                    .with_category("secret")
                    .with_remediation("Remove the secret from source and rotate the credential")
                    .with_raw(serde_json::json!({
                        "rule": pattern.rule,
                        "file": file,
                        "line": line_number,
                    })),
            )
        })
        .collect()
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(PathBuf::from)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}
