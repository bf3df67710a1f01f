//! Result aggregation
//!
//! Runs once per scan, after every run is terminal. Findings from all
//! successful runs are merged, deduplicated on a structural key, severity
//! normalized and sorted, then persisted with replace semantics. The same
//! run set always yields the same finding ids and order.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::info;

use vigil_core::domain::{
    Finding, FindingRecord, NormalizedResult, PriorityTier, RunState, ScanId, ScanSummary,
    ScannerRun, SeverityCounts,
};

use crate::infrastructure::store::{ScanStore, StoreError};

/// Successful adapter output with the priority it was scheduled at
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    pub adapter: String,
    pub tier: PriorityTier,
    /// Position in the scan's candidate list
    pub position: usize,
    pub result: NormalizedResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    title: String,
    category: String,
    host: String,
    port: Option<u16>,
}

impl DedupKey {
    fn of(record: &FindingRecord) -> Self {
        Self {
            title: normalize(&record.title),
            category: record
                .category
                .as_deref()
                .map(normalize)
                .unwrap_or_default(),
            host: record
                .host
                .as_deref()
                .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
                .unwrap_or_default(),
            port: record.port,
        }
    }

    fn finding_id(&self, scan_id: ScanId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(scan_id.0.as_bytes());
        for part in [&self.title, &self.category, &self.host] {
            hasher.update([0u8]);
            hasher.update(part.as_bytes());
        }
        hasher.update([0u8]);
        if let Some(port) = self.port {
            hasher.update(port.to_be_bytes());
        }
        let mut id = hex::encode(hasher.finalize());
        id.truncate(32);
        id
    }
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Merge adapter outputs into the scan's finding set.
pub fn merge(scan_id: ScanId, outputs: &[AdapterOutput]) -> Vec<Finding> {
    let mut ordered: Vec<&AdapterOutput> = outputs.iter().collect();
    ordered.sort_by(|a, b| {
        (a.tier, a.position, &a.adapter).cmp(&(b.tier, b.position, &b.adapter))
    });

    let mut index: HashMap<DedupKey, usize> = HashMap::new();
    let mut findings: Vec<Finding> = Vec::new();

    for output in ordered {
        for record in &output.result.findings {
            let key = DedupKey::of(record);
            if let Some(&existing) = index.get(&key) {
                let finding = &mut findings[existing];
                if finding.adapter != output.adapter
                    && !finding.corroborated_by.contains(&output.adapter)
                {
                    finding.corroborated_by.push(output.adapter.clone());
                }
                continue;
            }

            index.insert(key.clone(), findings.len());
            findings.push(Finding {
                id: key.finding_id(scan_id),
                scan_id,
                adapter: output.adapter.clone(),
                severity: record.effective_severity(),
                title: record.title.clone(),
                description: record.description.clone(),
                category: record.category.clone(),
                host: record.host.clone(),
                port: record.port,
                cve_ids: record.cve_ids.clone(),
                cvss_score: record.cvss_score,
                remediation: record.remediation.clone(),
                raw: record.raw.clone(),
                corroborated_by: Vec::new(),
            });
        }
    }

    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.port.cmp(&b.port))
            .then_with(|| a.id.cmp(&b.id))
    });
    findings
}

pub fn summarize(findings: &[Finding], runs: &[ScannerRun]) -> ScanSummary {
    let mut by_severity = SeverityCounts::default();
    for finding in findings {
        by_severity.record(finding.severity);
    }

    let count = |state: RunState| runs.iter().filter(|r| r.state == state).count();
    ScanSummary {
        by_severity,
        total_findings: findings.len(),
        total_runtime_ms: runs.iter().filter_map(|r| r.duration_ms).sum(),
        runs_succeeded: count(RunState::Succeeded),
        runs_failed: count(RunState::Failed),
        runs_timed_out: count(RunState::TimedOut),
        runs_cancelled: count(RunState::Cancelled),
        runs_skipped: count(RunState::Skipped),
        cache_hits: runs.iter().filter(|r| r.cache_hit).count(),
    }
}

/// Merges and persists a scan's findings
#[derive(Clone)]
pub struct ResultAggregator {
    store: Arc<dyn ScanStore>,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn ScanStore>) -> Self {
        Self { store }
    }

    pub async fn aggregate(
        &self,
        scan_id: ScanId,
        outputs: &[AdapterOutput],
        runs: &[ScannerRun],
    ) -> Result<ScanSummary, StoreError> {
        let findings = merge(scan_id, outputs);
        let summary = summarize(&findings, runs);
        let raw: usize = outputs.iter().map(|o| o.result.findings.len()).sum();

        self.store
            .replace_findings(scan_id, findings, summary.clone())
            .await?;

        info!(
            %scan_id,
            reported = raw,
            merged = summary.total_findings,
            critical = summary.by_severity.critical,
            high = summary.by_severity.high,
            "Findings aggregated"
        );
        Ok(summary)
    }
}
