//! Store wrappers that fail on demand

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vigil_core::domain::{Finding, Scan, ScanId, ScanSummary, ScannerRun, Target, TargetIdentity};
use vigil_orchestrator::{InMemoryScanStore, ScanStore, StoreError};

/// In-memory store whose run writes start failing after a fixed count
pub struct RunWriteLimitStore {
    inner: InMemoryScanStore,
    remaining: AtomicUsize,
}

impl RunWriteLimitStore {
    pub fn new(allowed_run_writes: usize) -> Self {
        Self {
            inner: InMemoryScanStore::new(),
            remaining: AtomicUsize::new(allowed_run_writes),
        }
    }
}

#[async_trait]
impl ScanStore for RunWriteLimitStore {
    async fn upsert_target(&self, identity: &TargetIdentity) -> Result<Target, StoreError> {
        self.inner.upsert_target(identity).await
    }

    async fn get_target(&self, identity: &TargetIdentity) -> Result<Option<Target>, StoreError> {
        self.inner.get_target(identity).await
    }

    async fn touch_target(
        &self,
        identity: &TargetIdentity,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.touch_target(identity, at).await
    }

    async fn save_scan(&self, scan: &Scan) -> Result<(), StoreError> {
        self.inner.save_scan(scan).await
    }

    async fn get_scan(&self, scan_id: ScanId) -> Result<Option<Scan>, StoreError> {
        self.inner.get_scan(scan_id).await
    }

    async fn list_scans(&self, limit: usize) -> Result<Vec<Scan>, StoreError> {
        self.inner.list_scans(limit).await
    }

    async fn save_run(&self, run: &ScannerRun) -> Result<(), StoreError> {
        let allowed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StoreError::Backend("run table is read-only".into()));
        }
        self.inner.save_run(run).await
    }

    async fn get_runs(&self, scan_id: ScanId) -> Result<Vec<ScannerRun>, StoreError> {
        self.inner.get_runs(scan_id).await
    }

    async fn replace_findings(
        &self,
        scan_id: ScanId,
        findings: Vec<Finding>,
        summary: ScanSummary,
    ) -> Result<(), StoreError> {
        self.inner.replace_findings(scan_id, findings, summary).await
    }

    async fn get_findings(&self, scan_id: ScanId) -> Result<Vec<Finding>, StoreError> {
        self.inner.get_findings(scan_id).await
    }

    async fn get_summary(&self, scan_id: ScanId) -> Result<Option<ScanSummary>, StoreError> {
        self.inner.get_summary(scan_id).await
    }
}
