//! Domain layer for scans, scanner runs and findings

pub mod adapter;
pub mod finding;
pub mod progress;
pub mod run;
pub mod scan;
pub mod target;

pub use adapter::{
    AdapterConfig, AdapterDescriptor, AdapterError, DurationClass, PriorityTier, ResourceProfile,
    ScannerAdapter,
};
pub use finding::{Finding, FindingRecord, NormalizedResult, ScanSummary, Severity, SeverityCounts};
pub use progress::ProgressEvent;
pub use run::{RunState, RunTransitionError, ScannerRun};
pub use scan::{
    FailureReason, Scan, ScanId, ScanProfile, ScanStatus, ScanTransition, ScanTransitionError,
    progress_percent,
};
pub use target::{Target, TargetIdentity, TargetType};
