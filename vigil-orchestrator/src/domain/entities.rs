//! Request and view types exposed by the scan control surface

use serde::{Deserialize, Serialize};

use vigil_core::domain::{
    AdapterDescriptor, Finding, ProgressEvent, Scan, ScanId, ScanProfile, ScanStatus,
    ScanSummary, ScannerRun, TargetIdentity,
};

/// Request to scan one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub target: TargetIdentity,
    pub profile: ScanProfile,
    /// Replaces the profile's adapter list when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapters: Option<Vec<String>>,
}

impl ScanRequest {
    pub fn new(target: TargetIdentity, profile: ScanProfile) -> Self {
        Self {
            target,
            profile,
            adapters: None,
        }
    }

    pub fn with_adapters<I, S>(mut self, adapters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.adapters = Some(adapters.into_iter().map(Into::into).collect());
        self
    }
}

/// `{status, progress, stage}` view of a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    pub progress: u8,
    pub stage: Option<String>,
}

impl From<&Scan> for ScanProgress {
    fn from(scan: &Scan) -> Self {
        Self {
            scan_id: scan.id,
            status: scan.status,
            progress: scan.progress,
            stage: scan.stage.clone(),
        }
    }
}

impl From<ProgressEvent> for ScanProgress {
    fn from(event: ProgressEvent) -> Self {
        Self {
            scan_id: event.scan_id,
            status: event.status,
            progress: event.progress,
            stage: event.stage,
        }
    }
}

/// Scan record with its runs and findings.
///
/// For a scan that has not reached a terminal state this is the partial
/// state so far, with `still_running` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResults {
    pub scan: Scan,
    pub runs: Vec<ScannerRun>,
    pub findings: Vec<Finding>,
    pub summary: Option<ScanSummary>,
    pub still_running: bool,
}

/// Registered adapter as reported to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub name: String,
    pub available: bool,
    pub descriptor: AdapterDescriptor,
}
