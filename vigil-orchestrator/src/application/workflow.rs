//! Scan Workflow: the single place scan state changes happen.
//!
//! Every transition is validated against [`ScanStatus`], persisted through
//! the [`ScanStore`] and then published to the scan's progress channel, in
//! that order, so a subscriber never sees a state the store does not have.
//!
//! ```text
//! ScanService        ScanWorkflow         ScanStore      ProgressBroadcaster
//!     │                   │                   │                 │
//!     ├─ create() ───────►│── save scan/runs ►│                 │
//!     │                   │── open ─────────────────────────────►│
//!     ├─ start() ────────►│── save_scan ─────►│                 │
//!     │                   │── publish ──────────────────────────►│
//!     ├─ progress() ─────►│── save_scan ─────►│── publish ──────►│
//!     ├─ complete() ─────►│── save_scan ─────►│── publish (last) ►│
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use vigil_core::domain::{
    FailureReason, RunTransitionError, Scan, ScanStatus, ScanSummary, ScanTransitionError,
    ScannerRun,
};

use crate::infrastructure::broadcaster::ProgressBroadcaster;
use crate::infrastructure::store::{ScanStore, StoreError};

/// Errors from the workflow layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid state transition: {0}")]
    InvalidTransition(#[from] ScanTransitionError),

    #[error("Invalid run transition: {0}")]
    Run(#[from] RunTransitionError),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ScanWorkflow {
    store: Arc<dyn ScanStore>,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl ScanWorkflow {
    pub fn new(store: Arc<dyn ScanStore>, broadcaster: Arc<ProgressBroadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Persist a new scan with its initial runs and open its progress channel.
    pub async fn create(&self, scan: &Scan, runs: &[ScannerRun]) -> Result<(), WorkflowError> {
        self.store.upsert_target(&scan.target).await?;
        self.store.save_scan(scan).await?;
        for run in runs {
            self.store.save_run(run).await?;
        }
        self.broadcaster.open(scan);

        info!(
            scan_id = %scan.id,
            target = %scan.target,
            profile = %scan.profile,
            runs = runs.len(),
            "Scan created"
        );
        Ok(())
    }

    /// Transition to [`ScanStatus::Running`] once tasks are admitted.
    pub async fn start(&self, scan: &mut Scan) -> Result<(), WorkflowError> {
        scan.transition(
            ScanStatus::Running,
            Some(format!("{} adapter tasks admitted", scan.adapters.len())),
        )?;
        scan.stage = Some("Queued".to_string());
        self.persist(scan).await?;

        info!(scan_id = %scan.id, adapters = ?scan.adapters, "Scan transitioned to Running");
        Ok(())
    }

    /// Record a progress or stage change; no-op if nothing changed.
    pub async fn progress(
        &self,
        scan: &mut Scan,
        progress: u8,
        stage: Option<String>,
    ) -> Result<(), WorkflowError> {
        let mut changed = scan.advance_progress(progress);
        if let Some(stage) = stage
            && !scan.is_terminal()
            && scan.stage.as_deref() != Some(stage.as_str())
        {
            scan.stage = Some(stage);
            changed = true;
        }
        if changed {
            self.persist(scan).await?;
            debug!(scan_id = %scan.id, progress = scan.progress, stage = ?scan.stage, "Scan progress");
        }
        Ok(())
    }

    /// Fail a scan that could not admit any adapter.
    pub async fn fail(&self, scan: &mut Scan, reason: FailureReason) -> Result<(), WorkflowError> {
        scan.fail(reason)?;
        self.persist(scan).await?;

        warn!(scan_id = %scan.id, target = %scan.target, %reason, "Scan transitioned to Failed");
        Ok(())
    }

    /// Transition to [`ScanStatus::Completed`] and stamp the target.
    pub async fn complete(&self, scan: &mut Scan, summary: &ScanSummary) -> Result<(), WorkflowError> {
        scan.transition(
            ScanStatus::Completed,
            Some(format!("Completed with {} findings", summary.total_findings)),
        )?;
        scan.stage = Some("Completed".to_string());
        self.persist(scan).await?;

        let finished = scan.completed_at.unwrap_or_else(Utc::now);
        self.store.touch_target(&scan.target, finished).await?;

        info!(
            scan_id = %scan.id,
            findings = summary.total_findings,
            succeeded = summary.runs_succeeded,
            failed = summary.runs_failed,
            timed_out = summary.runs_timed_out,
            "Scan transitioned to Completed"
        );
        Ok(())
    }

    pub async fn cancel(&self, scan: &mut Scan, reason: &str) -> Result<(), WorkflowError> {
        scan.transition(ScanStatus::Cancelled, Some(reason.to_string()))?;
        scan.stage = Some("Cancelled".to_string());
        self.persist(scan).await?;

        info!(scan_id = %scan.id, reason, "Scan transitioned to Cancelled");
        Ok(())
    }

    pub async fn record_run(&self, run: &ScannerRun) -> Result<(), WorkflowError> {
        self.store.save_run(run).await?;
        debug!(
            scan_id = %run.scan_id,
            adapter = %run.adapter,
            state = %run.state,
            cache_hit = run.cache_hit,
            "Run recorded"
        );
        Ok(())
    }

    async fn persist(&self, scan: &Scan) -> Result<(), WorkflowError> {
        self.store.save_scan(scan).await?;
        self.broadcaster.publish(scan);
        Ok(())
    }
}
