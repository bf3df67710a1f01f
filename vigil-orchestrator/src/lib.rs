//! Vigil Orchestrator - fan-out of scanner adapters against one target
//!
//! A scan request is turned into one task per admitted adapter. Tasks are
//! queued by priority tier, executed by a resource-aware worker pool, served
//! from the result cache where possible, and settled back into the scan's
//! state machine. Observers follow the scan through a per-scan progress
//! stream; once every task has settled the findings are merged and persisted.
//!
//! # Architecture
//!
//! ```text
//! vigil-orchestrator/
//! ├── domain/              # Requests, progress/result views, errors
//! ├── application/
//! │   ├── service.rs       # ScanService: control surface + per-scan driver
//! │   ├── selection.rs     # Profile → admitted adapters
//! │   ├── workflow.rs      # Validated, persisted, broadcast transitions
//! │   └── aggregator.rs    # Dedup, severity normalization, summary
//! └── infrastructure/
//!     ├── cache/           # moka L1 + file L2 result cache, single flight per key
//!     ├── scheduler/       # Priority queue, worker pool, autoscaling
//!     ├── broadcaster.rs   # Per-scan progress fan-out
//!     ├── registry.rs      # Adapter registry
//!     └── store.rs         # ScanStore boundary + in-memory store
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! start_scan ──► Pending ──(≥1 task admitted)──► Running ──► Completed
//!                   │                               │
//!                   ├──(no adapters)──► Failed       └──(cancel)──► Cancelled
//!                   └──(cancel)──► Cancelled
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::aggregator::ResultAggregator;
pub use application::service::ScanService;
pub use application::workflow::{ScanWorkflow, WorkflowError};
pub use domain::{AdapterInfo, ScanProgress, ScanRequest, ScanResults, ScanServiceError};
pub use infrastructure::broadcaster::{ProgressBroadcaster, ProgressSubscription};
pub use infrastructure::cache::{CacheKey, CacheStats, ResultCache};
pub use infrastructure::registry::AdapterRegistry;
pub use infrastructure::scheduler::{
    ResourceProbe, ResourceSample, Scheduler, SchedulerError, SchedulerMetrics, SystemProbe,
};
pub use infrastructure::store::{InMemoryScanStore, ScanStore, StoreError};
