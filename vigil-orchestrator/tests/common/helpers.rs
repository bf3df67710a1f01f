//! Service construction helpers

use std::sync::Arc;
use std::time::Duration;

use vigil_core::Config;
use vigil_core::config::AdapterSettings;
use vigil_core::domain::{FindingRecord, ScanId, ScanStatus, ScannerAdapter, Severity};
use vigil_orchestrator::infrastructure::scheduler::FixedProbe;
use vigil_orchestrator::{
    AdapterRegistry, InMemoryScanStore, ResourceSample, ScanProgress, ScanService, ScanStore,
};

/// Configuration with short grace periods suitable for tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.scheduler.min_workers = 1;
    config.scheduler.max_workers = 4;
    config.scheduler.poll_interval_ms = 50;
    config.scan.default_timeout_secs = 10;
    config.scan.cancel_grace_secs = 2;
    config.scan.termination_grace_secs = 1;
    config
}

pub fn with_timeout(mut config: Config, adapter: &str, secs: u64) -> Config {
    config.adapters.insert(
        adapter.to_string(),
        AdapterSettings {
            timeout_secs: Some(secs),
            ..Default::default()
        },
    );
    config
}

/// Service over an in-memory store with a probe that never triggers scaling
pub fn service_with(config: Config, adapters: Vec<Arc<dyn ScannerAdapter>>) -> ScanService {
    ScanService::with_probe(
        config,
        AdapterRegistry::from_adapters(adapters),
        Arc::new(InMemoryScanStore::new()),
        Box::new(FixedProbe(ResourceSample::new(0.6, 0.7))),
    )
}

/// Same as [`service_with`] over a caller-supplied store
pub fn service_with_store(
    config: Config,
    adapters: Vec<Arc<dyn ScannerAdapter>>,
    store: Arc<dyn ScanStore>,
) -> ScanService {
    ScanService::with_probe(
        config,
        AdapterRegistry::from_adapters(adapters),
        store,
        Box::new(FixedProbe(ResourceSample::new(0.6, 0.7))),
    )
}

pub fn service(adapters: Vec<Arc<dyn ScannerAdapter>>) -> ScanService {
    service_with(test_config(), adapters)
}

/// Wait for a scan to finish, failing the test after `limit`.
pub async fn finish(service: &ScanService, scan_id: ScanId, limit: Duration) -> ScanProgress {
    let progress = tokio::time::timeout(limit, service.wait_for_completion(scan_id))
        .await
        .expect("scan did not finish in time")
        .expect("scan exists");
    assert!(
        matches!(
            progress.status,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        ),
        "unexpected status {:?}",
        progress.status
    );
    progress
}

pub fn tls_finding(title: &str, severity: Severity) -> FindingRecord {
    FindingRecord::new(title, severity)
        .with_category("tls")
        .with_host("example.com")
        .with_port(443)
}
