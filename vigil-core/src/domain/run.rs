//! Scanner run records: one per (scan, adapter)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::adapter::PriorityTier;
use super::scan::ScanId;

/// Lifecycle of a single adapter execution within a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    /// Configured for the profile but the tool was not available
    Skipped,
}

impl RunState {
    pub fn valid_transitions(&self) -> &[RunState] {
        match self {
            Self::Queued => &[Self::Running, Self::Cancelled],
            Self::Running => &[
                Self::Succeeded,
                Self::Failed,
                Self::TimedOut,
                Self::Cancelled,
            ],
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled | Self::Skipped => {
                &[]
            }
        }
    }

    pub fn can_transition_to(&self, target: &RunState) -> bool {
        self.valid_transitions().contains(target)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// Settled runs count towards scan progress; skipped runs never entered
    /// the scheduler and do not.
    pub fn counts_as_settled(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid run transition for {adapter} from {from} to {to}")]
pub struct RunTransitionError {
    pub adapter: String,
    pub from: RunState,
    pub to: RunState,
}

/// Execution record of one adapter within one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerRun {
    pub id: Uuid,
    pub scan_id: ScanId,
    pub adapter: String,
    pub tier: PriorityTier,
    pub state: RunState,
    pub cache_hit: bool,
    pub duration_ms: Option<u64>,
    pub finding_count: usize,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScannerRun {
    pub fn queued(scan_id: ScanId, adapter: impl Into<String>, tier: PriorityTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            scan_id,
            adapter: adapter.into(),
            tier,
            state: RunState::Queued,
            cache_hit: false,
            duration_ms: None,
            finding_count: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn skipped(
        scan_id: ScanId,
        adapter: impl Into<String>,
        tier: PriorityTier,
        reason: impl Into<String>,
    ) -> Self {
        let mut run = Self::queued(scan_id, adapter, tier);
        run.state = RunState::Skipped;
        run.error = Some(reason.into());
        run.finished_at = Some(Utc::now());
        run
    }

    fn apply(&mut self, to: RunState) -> Result<(), RunTransitionError> {
        if !self.state.can_transition_to(&to) {
            return Err(RunTransitionError {
                adapter: self.adapter.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), RunTransitionError> {
        self.apply(RunState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Settle the run. Terminal runs are immutable; settling twice fails.
    pub fn settle(
        &mut self,
        state: RunState,
        duration_ms: u64,
        cache_hit: bool,
        error: Option<String>,
    ) -> Result<(), RunTransitionError> {
        self.apply(state)?;
        self.duration_ms = Some(duration_ms);
        self.cache_hit = cache_hit;
        self.error = error;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}
