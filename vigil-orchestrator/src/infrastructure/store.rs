//! Persistence boundary for targets, scans, runs and findings

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use vigil_core::domain::{Finding, Scan, ScanId, ScanSummary, ScannerRun, Target, TargetIdentity};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Scan not found: {0}")]
    NotFound(ScanId),
    #[error("Store backend failed: {0}")]
    Backend(String),
}

/// Scan persistence interface.
///
/// Writers are the orchestrator only. Findings are replaced as a set so that
/// re-running aggregation never duplicates rows.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Insert the target if it is new; returns the stored record.
    async fn upsert_target(&self, identity: &TargetIdentity) -> Result<Target, StoreError>;
    async fn get_target(&self, identity: &TargetIdentity) -> Result<Option<Target>, StoreError>;
    async fn touch_target(
        &self,
        identity: &TargetIdentity,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn save_scan(&self, scan: &Scan) -> Result<(), StoreError>;
    async fn get_scan(&self, scan_id: ScanId) -> Result<Option<Scan>, StoreError>;
    /// Most recent first
    async fn list_scans(&self, limit: usize) -> Result<Vec<Scan>, StoreError>;

    /// Insert or replace a run by id.
    async fn save_run(&self, run: &ScannerRun) -> Result<(), StoreError>;
    async fn get_runs(&self, scan_id: ScanId) -> Result<Vec<ScannerRun>, StoreError>;

    async fn replace_findings(
        &self,
        scan_id: ScanId,
        findings: Vec<Finding>,
        summary: ScanSummary,
    ) -> Result<(), StoreError>;
    async fn get_findings(&self, scan_id: ScanId) -> Result<Vec<Finding>, StoreError>;
    async fn get_summary(&self, scan_id: ScanId) -> Result<Option<ScanSummary>, StoreError>;
}

#[derive(Default)]
struct Tables {
    targets: HashMap<TargetIdentity, Target>,
    scans: HashMap<ScanId, Scan>,
    runs: HashMap<ScanId, Vec<ScannerRun>>,
    findings: HashMap<ScanId, Vec<Finding>>,
    summaries: HashMap<ScanId, ScanSummary>,
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryScanStore {
    tables: RwLock<Tables>,
}

impl InMemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanStore for InMemoryScanStore {
    async fn upsert_target(&self, identity: &TargetIdentity) -> Result<Target, StoreError> {
        let mut tables = self.tables.write().await;
        let target = tables
            .targets
            .entry(identity.clone())
            .or_insert_with(|| Target::new(identity.clone()));
        Ok(target.clone())
    }

    async fn get_target(&self, identity: &TargetIdentity) -> Result<Option<Target>, StoreError> {
        Ok(self.tables.read().await.targets.get(identity).cloned())
    }

    async fn touch_target(
        &self,
        identity: &TargetIdentity,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .targets
            .entry(identity.clone())
            .or_insert_with(|| Target::new(identity.clone()))
            .mark_scanned(at);
        Ok(())
    }

    async fn save_scan(&self, scan: &Scan) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .scans
            .insert(scan.id, scan.clone());
        Ok(())
    }

    async fn get_scan(&self, scan_id: ScanId) -> Result<Option<Scan>, StoreError> {
        Ok(self.tables.read().await.scans.get(&scan_id).cloned())
    }

    async fn list_scans(&self, limit: usize) -> Result<Vec<Scan>, StoreError> {
        let tables = self.tables.read().await;
        let mut scans: Vec<Scan> = tables.scans.values().cloned().collect();
        scans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        scans.truncate(limit);
        Ok(scans)
    }

    async fn save_run(&self, run: &ScannerRun) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let runs = tables.runs.entry(run.scan_id).or_default();
        match runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => runs.push(run.clone()),
        }
        Ok(())
    }

    async fn get_runs(&self, scan_id: ScanId) -> Result<Vec<ScannerRun>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .runs
            .get(&scan_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_findings(
        &self,
        scan_id: ScanId,
        findings: Vec<Finding>,
        summary: ScanSummary,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.scans.contains_key(&scan_id) {
            return Err(StoreError::NotFound(scan_id));
        }
        debug!(%scan_id, findings = findings.len(), "Findings replaced");
        tables.findings.insert(scan_id, findings);
        tables.summaries.insert(scan_id, summary);
        Ok(())
    }

    async fn get_findings(&self, scan_id: ScanId) -> Result<Vec<Finding>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .findings
            .get(&scan_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_summary(&self, scan_id: ScanId) -> Result<Option<ScanSummary>, StoreError> {
        Ok(self.tables.read().await.summaries.get(&scan_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::domain::{PriorityTier, RunState, ScanProfile, TargetType};

    fn identity() -> TargetIdentity {
        TargetIdentity::new(TargetType::Hostname, "example.com")
    }

    #[tokio::test]
    async fn test_target_upsert_is_idempotent() {
        let store = InMemoryScanStore::new();
        let first = store.upsert_target(&identity()).await.unwrap();
        let second = store.upsert_target(&identity()).await.unwrap();
        assert_eq!(first.created_at, second.created_at);

        let now = Utc::now();
        store.touch_target(&identity(), now).await.unwrap();
        let target = store.get_target(&identity()).await.unwrap().unwrap();
        assert_eq!(target.last_scanned, Some(now));
    }

    #[tokio::test]
    async fn test_save_run_replaces_by_id_keeping_order() {
        let store = InMemoryScanStore::new();
        let scan_id = ScanId::new();
        let mut first = ScannerRun::queued(scan_id, "nuclei", PriorityTier::Standard);
        let second = ScannerRun::queued(scan_id, "nikto", PriorityTier::Background);
        store.save_run(&first).await.unwrap();
        store.save_run(&second).await.unwrap();

        first.start().unwrap();
        store.save_run(&first).await.unwrap();

        let runs = store.get_runs(scan_id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].adapter, "nuclei");
        assert_eq!(runs[0].state, RunState::Running);
    }

    #[tokio::test]
    async fn test_replace_findings_requires_scan() {
        let store = InMemoryScanStore::new();
        let scan = Scan::new(identity(), ScanProfile::Web);
        let err = store
            .replace_findings(scan.id, Vec::new(), ScanSummary::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == scan.id));

        store.save_scan(&scan).await.unwrap();
        store
            .replace_findings(scan.id, Vec::new(), ScanSummary::default())
            .await
            .unwrap();
        assert_eq!(
            store.get_summary(scan.id).await.unwrap(),
            Some(ScanSummary::default())
        );
    }
}
