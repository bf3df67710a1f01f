//! Scan entity and its lifecycle state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::target::TargetIdentity;

/// Unique scan identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanId(pub Uuid);

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ScanId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Named adapter set requested for a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanProfile {
    Quick,
    Default,
    Full,
    Network,
    Web,
}

impl ScanProfile {
    pub const ALL: [ScanProfile; 5] = [
        Self::Quick,
        Self::Default,
        Self::Full,
        Self::Network,
        Self::Web,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Default => "default",
            Self::Full => "full",
            Self::Network => "network",
            Self::Web => "web",
        }
    }

    /// Whether adapters may run against target types they only support
    /// as an extension (e.g. web tools pointed at a bare address).
    pub fn allows_extended_targets(&self) -> bool {
        matches!(self, Self::Full)
    }
}

impl fmt::Display for ScanProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a profile name is not recognized
#[derive(Debug, thiserror::Error)]
#[error("Unknown scan profile: {0}")]
pub struct UnknownScanProfile(pub String);

impl FromStr for ScanProfile {
    type Err = UnknownScanProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "default" => Ok(Self::Default),
            "full" => Ok(Self::Full),
            "network" => Ok(Self::Network),
            "web" => Ok(Self::Web),
            other => Err(UnknownScanProfile(other.to_string())),
        }
    }
}

/// Scan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// Created, adapters not yet admitted
    Pending,
    /// At least one adapter task admitted to the scheduler
    Running,
    /// Every admitted task settled
    Completed,
    /// No adapter could be admitted
    Failed,
    /// Cancelled on request
    Cancelled,
}

impl ScanStatus {
    /// Returns the set of valid target states from the current state.
    ///
    /// ```text
    /// Pending ──► Running ──► Completed
    ///   │  │         │
    ///   │  │         └──► Cancelled
    ///   │  └──► Cancelled
    ///   └──► Failed
    /// ```
    pub fn valid_transitions(&self) -> &[ScanStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Failed, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: &ScanStatus) -> bool {
        self.valid_transitions().contains(target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Why a scan ended in [`ScanStatus::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No adapter in the profile supports the target type
    NoApplicableAdapters,
    /// Compatible adapters exist but none of their tools are installed
    NoAvailableAdapters,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoApplicableAdapters => write!(f, "NoApplicableAdapters"),
            Self::NoAvailableAdapters => write!(f, "NoAvailableAdapters"),
        }
    }
}

/// Recorded state transition for a scan (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTransition {
    pub from: ScanStatus,
    pub to: ScanStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an invalid status transition is attempted.
#[derive(Debug, thiserror::Error)]
#[error("Invalid scan transition from {from} to {to}")]
pub struct ScanTransitionError {
    pub from: ScanStatus,
    pub to: ScanStatus,
}

/// One request to assess a target with a set of adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: ScanId,
    pub target: TargetIdentity,
    pub profile: ScanProfile,
    /// Admitted adapters in profile order
    pub adapters: Vec<String>,
    pub status: ScanStatus,
    pub progress: u8,
    pub stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure: Option<FailureReason>,
    #[serde(default)]
    pub transitions: Vec<ScanTransition>,
}

impl Scan {
    pub fn new(target: TargetIdentity, profile: ScanProfile) -> Self {
        Self {
            id: ScanId::new(),
            target,
            profile,
            adapters: Vec::new(),
            status: ScanStatus::Pending,
            progress: 0,
            stage: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure: None,
            transitions: Vec::new(),
        }
    }

    /// Validate and apply a status transition, recording it in the audit trail.
    ///
    /// Entering a terminal state pins progress at 100.
    pub fn transition(
        &mut self,
        to: ScanStatus,
        reason: Option<String>,
    ) -> Result<(), ScanTransitionError> {
        if !self.status.can_transition_to(&to) {
            return Err(ScanTransitionError {
                from: self.status,
                to,
            });
        }

        let now = Utc::now();
        self.transitions.push(ScanTransition {
            from: self.status,
            to,
            timestamp: now,
            reason,
        });
        self.status = to;

        match to {
            ScanStatus::Running => self.started_at = Some(now),
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled => {
                self.completed_at = Some(now);
                self.progress = 100;
            }
            ScanStatus::Pending => {}
        }

        Ok(())
    }

    /// Mark the scan failed with a reason.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), ScanTransitionError> {
        self.transition(ScanStatus::Failed, Some(reason.to_string()))?;
        self.failure = Some(reason);
        self.stage = Some(format!("Failed: {}", reason));
        Ok(())
    }

    /// Raise progress for a non-terminal scan.
    ///
    /// Values are clamped below 100 and never decrease. Returns whether the
    /// stored value changed.
    pub fn advance_progress(&mut self, progress: u8) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let progress = progress.min(99);
        if progress > self.progress {
            self.progress = progress;
            true
        } else {
            false
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// `floor(settled / total * 100)`, with an empty task set counted as done.
pub fn progress_percent(settled: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let settled = settled.min(total);
    ((settled * 100) / total) as u8
}
