//! Scripted scanner adapters

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vigil_core::domain::{
    AdapterConfig, AdapterDescriptor, AdapterError, DurationClass, FindingRecord,
    NormalizedResult, PriorityTier, ResourceProfile, ScannerAdapter, TargetIdentity, TargetType,
};

/// What a mock adapter does when run
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Sleep for the delay, then return these findings
    Findings(Vec<FindingRecord>),
    /// Sleep for the delay, then fail
    Fail(String),
    /// Run until cancelled
    Hang,
}

pub struct MockAdapter {
    descriptor: AdapterDescriptor,
    available: bool,
    delay: Duration,
    behavior: Behavior,
    runs: Arc<AtomicUsize>,
}

impl MockAdapter {
    pub fn new(name: &str, target_types: &[TargetType]) -> Self {
        Self {
            descriptor: AdapterDescriptor {
                name: name.to_string(),
                description: format!("mock {name}"),
                target_types: target_types.to_vec(),
                extended_target_types: Vec::new(),
                default_tier: PriorityTier::Standard,
                resources: ResourceProfile::new(DurationClass::Seconds, 0.1, 0.1, false),
                binary: Some(format!("{name}-mock")),
            },
            available: true,
            delay: Duration::from_millis(20),
            behavior: Behavior::Findings(Vec::new()),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Adapter for hostnames and URLs
    pub fn web(name: &str) -> Self {
        Self::new(name, &[TargetType::Hostname, TargetType::Url])
    }

    pub fn with_tier(mut self, tier: PriorityTier) -> Self {
        self.descriptor.default_tier = tier;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_findings(mut self, findings: Vec<FindingRecord>) -> Self {
        self.behavior = Behavior::Findings(findings);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.behavior = Behavior::Fail(message.to_string());
        self
    }

    pub fn hanging(mut self) -> Self {
        self.behavior = Behavior::Hang;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Shared counter of how many times `run` was entered
    pub fn run_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }

    pub fn into_arc(self) -> Arc<dyn ScannerAdapter> {
        Arc::new(self)
    }
}

#[async_trait]
impl ScannerAdapter for MockAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn run(
        &self,
        _target: &TargetIdentity,
        _config: &AdapterConfig,
        cancel: CancellationToken,
        _deadline: Instant,
    ) -> Result<NormalizedResult, AdapterError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let name = self.descriptor.name.clone();

        if let Behavior::Hang = self.behavior {
            cancel.cancelled().await;
            return Err(AdapterError::cancelled(name));
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(AdapterError::cancelled(name)),
            _ = tokio::time::sleep(self.delay) => match &self.behavior {
                Behavior::Findings(findings) => Ok(NormalizedResult::new(
                    findings.clone(),
                    self.delay.as_millis() as u64,
                )),
                Behavior::Fail(message) => Err(AdapterError::failure(name, message.clone())),
                Behavior::Hang => Err(AdapterError::cancelled(name)),
            },
        }
    }
}
