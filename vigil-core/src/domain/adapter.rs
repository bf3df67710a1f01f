//! Scanner adapter contract
//!
//! Every integrated tool is wrapped by a [`ScannerAdapter`]. The orchestrator
//! only ever talks to tools through this trait: it asks the adapter what it
//! can scan, whether its tool is installed, and then runs it with a
//! cancellation token and a hard deadline.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::finding::NormalizedResult;
use super::scan::ScanProfile;
use super::target::{TargetIdentity, TargetType};

/// Scheduling tier; lower tiers are dequeued first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    /// Critical-path work such as secret scanning
    Critical,
    High,
    Standard,
    /// Slow, network-bound crawlers
    Background,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Standard => "standard",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rough wall-clock expectation for a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationClass {
    /// Typically finishes in under a minute
    Seconds,
    /// Several minutes
    Minutes,
    /// Can run for an hour or more
    Long,
}

/// Resource footprint advertised by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub duration_class: DurationClass,
    /// Relative CPU demand in `[0, 1]`
    pub cpu_weight: f32,
    /// Relative memory demand in `[0, 1]`
    pub mem_weight: f32,
    pub network_bound: bool,
}

impl ResourceProfile {
    pub const fn new(
        duration_class: DurationClass,
        cpu_weight: f32,
        mem_weight: f32,
        network_bound: bool,
    ) -> Self {
        Self {
            duration_class,
            cpu_weight,
            mem_weight,
            network_bound,
        }
    }
}

/// Static metadata describing an adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    pub name: String,
    pub description: String,
    /// Target types the tool handles natively
    pub target_types: Vec<TargetType>,
    /// Target types accepted only when the profile allows extended targets
    #[serde(default)]
    pub extended_target_types: Vec<TargetType>,
    pub default_tier: PriorityTier,
    pub resources: ResourceProfile,
    /// Executable looked up on `PATH`, if the adapter shells out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
}

impl AdapterDescriptor {
    pub fn supports(&self, target_type: TargetType, profile: ScanProfile) -> bool {
        self.target_types.contains(&target_type)
            || (profile.allows_extended_targets()
                && self.extended_target_types.contains(&target_type))
    }
}

/// Per-run adapter configuration.
///
/// The fingerprint covers everything that can change the tool's output, so
/// two runs with the same target and fingerprint are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub profile: ScanProfile,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl AdapterConfig {
    pub fn new(profile: ScanProfile) -> Self {
        Self {
            profile,
            options: BTreeMap::new(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Hex SHA-256 over the canonical form of this configuration.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.profile.as_str().as_bytes());
        for (key, value) in &self.options {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        for arg in &self.extra_args {
            hasher.update([1u8]);
            hasher.update(arg.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Adapter failure taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("{tool} is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("{tool} failed{}: {message}", .exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    ExecutionFailure {
        tool: String,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("{tool} exceeded its deadline after {elapsed_ms}ms")]
    TimedOut { tool: String, elapsed_ms: u64 },

    #[error("{tool} was cancelled")]
    Cancelled { tool: String },
}

impl AdapterError {
    pub fn unavailable(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn failure(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailure {
            tool: tool.into(),
            exit_code: None,
            message: message.into(),
        }
    }

    pub fn cancelled(tool: impl Into<String>) -> Self {
        Self::Cancelled { tool: tool.into() }
    }

    pub fn timed_out(tool: impl Into<String>, elapsed: Duration) -> Self {
        Self::TimedOut {
            tool: tool.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolUnavailable { .. } => "ToolUnavailable",
            Self::ExecutionFailure { .. } => "ExecutionFailure",
            Self::TimedOut { .. } => "TimedOut",
            Self::Cancelled { .. } => "Cancelled",
        }
    }
}

/// Trait that all scanner adapters must implement
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    /// Static metadata: name, target compatibility, tier and resource profile
    fn descriptor(&self) -> &AdapterDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn estimated_profile(&self) -> ResourceProfile {
        self.descriptor().resources
    }

    /// Check whether the underlying tool is present. Must not have side effects.
    fn is_available(&self) -> bool;

    /// Run the tool against `target`.
    ///
    /// Implementations must observe `cancel` and stop the underlying tool
    /// within a bounded grace period, returning [`AdapterError::Cancelled`].
    /// `deadline` is the instant after which the scheduler will treat the run
    /// as timed out.
    async fn run(
        &self,
        target: &TargetIdentity,
        config: &AdapterConfig,
        cancel: CancellationToken,
        deadline: Instant,
    ) -> Result<NormalizedResult, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_descriptor() -> AdapterDescriptor {
        AdapterDescriptor {
            name: "nikto".into(),
            description: "web server scanner".into(),
            target_types: vec![TargetType::Hostname, TargetType::Url],
            extended_target_types: vec![TargetType::Address],
            default_tier: PriorityTier::Background,
            resources: ResourceProfile::new(DurationClass::Long, 0.3, 0.2, true),
            binary: Some("nikto".into()),
        }
    }

    #[test]
    fn test_extended_targets_only_under_full_profile() {
        let d = web_descriptor();
        assert!(d.supports(TargetType::Hostname, ScanProfile::Web));
        assert!(!d.supports(TargetType::Address, ScanProfile::Web));
        assert!(d.supports(TargetType::Address, ScanProfile::Full));
        assert!(!d.supports(TargetType::Repository, ScanProfile::Full));
    }

    #[test]
    fn test_tier_ordering() {
        assert!(PriorityTier::Critical < PriorityTier::High);
        assert!(PriorityTier::Standard < PriorityTier::Background);
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = AdapterConfig::new(ScanProfile::Quick).with_option("rate", "100");
        let b = AdapterConfig::new(ScanProfile::Quick).with_option("rate", "100");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = AdapterConfig::new(ScanProfile::Full).with_option("rate", "100");
        assert_ne!(a.fingerprint(), c.fingerprint());

        let d = a.clone().with_extra_args(vec!["-v".into()]);
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn test_error_display() {
        let err = AdapterError::ExecutionFailure {
            tool: "nmap".into(),
            exit_code: Some(2),
            message: "bad args".into(),
        };
        assert_eq!(err.to_string(), "nmap failed with exit code 2: bad args");
        assert_eq!(err.kind(), "ExecutionFailure");
    }
}
