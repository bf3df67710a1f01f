//! Application setup and wiring

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vigil_adapters::builtin_adapters;
use vigil_core::Config;
use vigil_orchestrator::{AdapterRegistry, InMemoryScanStore, ScanService};

/// Handle returned from create_app for graceful shutdown coordination
pub struct AppHandle {
    pub service: ScanService,
    pub shutdown_token: CancellationToken,
}

impl AppHandle {
    /// Cancel in-flight scans and wait for their drivers to settle.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.service.shutdown().await;
    }
}

/// Build the adapter registry, store and scan service from configuration.
///
/// Must be called inside a tokio runtime.
pub async fn create_app(config: Config) -> anyhow::Result<AppHandle> {
    let adapters = builtin_adapters(&config);
    for adapter in &adapters {
        let available = adapter.is_available();
        tracing::debug!(
            adapter = adapter.name(),
            available,
            tier = %adapter.descriptor().default_tier,
            "Adapter registered"
        );
    }

    let registry = AdapterRegistry::from_adapters(adapters);
    let available = registry.iter().filter(|a| a.is_available()).count();
    tracing::info!(
        registered = registry.len(),
        available,
        "Adapter registry initialized"
    );

    let store = Arc::new(InMemoryScanStore::new());
    let service = ScanService::new(config, registry, store);

    Ok(AppHandle {
        service,
        shutdown_token: CancellationToken::new(),
    })
}
