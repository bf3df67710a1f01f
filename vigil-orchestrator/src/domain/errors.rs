//! Errors returned by the scan control surface

use vigil_core::domain::ScanId;

use crate::application::workflow::WorkflowError;
use crate::infrastructure::scheduler::SchedulerError;
use crate::infrastructure::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ScanServiceError {
    #[error("Scan not found: {0}")]
    NotFound(ScanId),

    #[error("Unknown adapter: {0}")]
    UnknownAdapter(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),
}

impl ScanServiceError {
    /// Rejections the caller may retry later without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Scheduler(SchedulerError::Saturated { .. }))
    }
}
