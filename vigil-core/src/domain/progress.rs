//! Progress events streamed to scan observers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scan::{Scan, ScanId, ScanStatus};

/// Snapshot of a scan's externally visible progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub scan_id: ScanId,
    /// Position in the scan's event stream, starting at 0
    pub sequence: u64,
    pub status: ScanStatus,
    pub progress: u8,
    pub stage: Option<String>,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn from_scan(scan: &Scan, sequence: u64) -> Self {
        Self {
            scan_id: scan.id,
            sequence,
            status: scan.status,
            progress: scan.progress,
            stage: scan.stage.clone(),
            at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
