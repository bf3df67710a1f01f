//! Typed configuration sections
//!
//! These structs describe every recognized key and its default. Loading
//! (files, environment) and validation happen in the `vigil` binary crate;
//! the orchestration core only consumes the typed values.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::adapter::PriorityTier;
use crate::domain::scan::ScanProfile;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub scan: ScanConfig,
    pub cache: CacheConfig,
    /// Per-adapter overrides keyed by adapter name
    pub adapters: BTreeMap<String, AdapterSettings>,
    pub profiles: ProfilesConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn adapter_settings(&self, name: &str) -> AdapterSettings {
        self.adapters.get(name).cloned().unwrap_or_default()
    }

    /// Effective timeout for an adapter: its override or the scan default.
    pub fn adapter_timeout(&self, name: &str) -> Duration {
        let secs = self
            .adapters
            .get(name)
            .and_then(|s| s.timeout_secs)
            .unwrap_or(self.scan.default_timeout_secs);
        Duration::from_secs(secs)
    }
}

/// Worker pool and queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker floor
    pub min_workers: usize,
    /// Worker ceiling; the pool starts here and shrinks under pressure
    pub max_workers: usize,
    /// Hard cap on queued tasks; admission beyond it is rejected
    pub queue_capacity: usize,
    /// Resource sampling interval
    pub poll_interval_ms: u64,
    /// Utilization ratios in `[0, 1]`
    pub cpu_high_water: f32,
    pub cpu_low_water: f32,
    pub memory_high_water: f32,
    pub memory_low_water: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 3,
            queue_capacity: 256,
            poll_interval_ms: 2_000,
            cpu_high_water: 0.80,
            cpu_low_water: 0.50,
            memory_high_water: 0.85,
            memory_low_water: 0.60,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Scan lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Adapter timeout when no per-adapter override exists
    pub default_timeout_secs: u64,
    /// How long cancellation waits for running tasks to settle
    pub cancel_grace_secs: u64,
    /// Time between SIGTERM and SIGKILL for external tools
    pub termination_grace_secs: u64,
    /// Per-scan progress channel capacity
    pub event_buffer: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 600,
            cancel_grace_secs: 15,
            termination_grace_secs: 5,
            event_buffer: 64,
        }
    }
}

impl ScanConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: u64,
    /// Directory for the on-disk tier; in-memory only when unset
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3_600,
            max_entries: 10_000,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Overrides for a single adapter
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdapterSettings {
    /// Disabled adapters are never registered
    pub disabled: bool,
    pub timeout_secs: Option<u64>,
    /// Executable override (defaults to the tool's usual binary name)
    pub binary: Option<String>,
    /// Extra command-line arguments appended to every invocation
    pub args: Vec<String>,
    /// Tool-specific options; part of the cache fingerprint
    pub options: BTreeMap<String, String>,
}

/// Ordered candidate adapters for each scan profile.
///
/// Profiles absent from the configured map keep their built-in list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<ScanProfile, Vec<ProfileEntry>>",
    into = "BTreeMap<ScanProfile, Vec<ProfileEntry>>"
)]
pub struct ProfilesConfig(pub BTreeMap<ScanProfile, Vec<ProfileEntry>>);

impl From<BTreeMap<ScanProfile, Vec<ProfileEntry>>> for ProfilesConfig {
    fn from(configured: BTreeMap<ScanProfile, Vec<ProfileEntry>>) -> Self {
        let mut profiles = Self::default();
        profiles.0.extend(configured);
        profiles
    }
}

impl From<ProfilesConfig> for BTreeMap<ScanProfile, Vec<ProfileEntry>> {
    fn from(profiles: ProfilesConfig) -> Self {
        profiles.0
    }
}

impl ProfilesConfig {
    pub fn entries(&self, profile: ScanProfile) -> &[ProfileEntry] {
        self.0.get(&profile).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        let mk = |names: &[&str]| -> Vec<ProfileEntry> {
            names.iter().map(|n| ProfileEntry::named(*n)).collect()
        };

        let mut map = BTreeMap::new();
        map.insert(ScanProfile::Quick, mk(&["secrets", "nmap", "nuclei"]));
        map.insert(
            ScanProfile::Default,
            mk(&["secrets", "gitleaks", "semgrep", "nmap", "nuclei", "nikto"]),
        );
        map.insert(
            ScanProfile::Full,
            mk(&[
                "secrets", "gitleaks", "semgrep", "trivy", "nmap", "nuclei", "nikto", "zap",
            ]),
        );
        map.insert(ScanProfile::Network, mk(&["nmap"]));
        map.insert(ScanProfile::Web, mk(&["nuclei", "nikto", "zap"]));
        Self(map)
    }
}

/// One adapter slot in a profile.
///
/// Accepts either a bare adapter name or `{ adapter, tier }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ProfileEntrySpec")]
pub struct ProfileEntry {
    pub adapter: String,
    /// Overrides the adapter's default tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<PriorityTier>,
}

impl ProfileEntry {
    pub fn named(adapter: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            tier: None,
        }
    }

    pub fn with_tier(mut self, tier: PriorityTier) -> Self {
        self.tier = Some(tier);
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileEntrySpec {
    Name(String),
    Full {
        adapter: String,
        #[serde(default)]
        tier: Option<PriorityTier>,
    },
}

impl From<ProfileEntrySpec> for ProfileEntry {
    fn from(spec: ProfileEntrySpec) -> Self {
        match spec {
            ProfileEntrySpec::Name(adapter) => Self::named(adapter),
            ProfileEntrySpec::Full { adapter, tier } => Self { adapter, tier },
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json`, `pretty` or `compact`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profiles_cover_every_profile() {
        let profiles = ProfilesConfig::default();
        for profile in ScanProfile::ALL {
            assert!(
                !profiles.entries(profile).is_empty(),
                "profile {profile} has no adapters"
            );
        }
        let web: Vec<_> = profiles
            .entries(ScanProfile::Web)
            .iter()
            .map(|e| e.adapter.as_str())
            .collect();
        assert_eq!(web, ["nuclei", "nikto", "zap"]);
    }

    #[test]
    fn test_profile_entry_accepts_name_or_table() {
        let entries: Vec<ProfileEntry> =
            serde_json::from_str(r#"["nmap", {"adapter": "zap", "tier": "high"}]"#).unwrap();
        assert_eq!(entries[0], ProfileEntry::named("nmap"));
        assert_eq!(
            entries[1],
            ProfileEntry::named("zap").with_tier(PriorityTier::High)
        );
    }

    #[test]
    fn test_adapter_timeout_falls_back_to_default() {
        let mut config = Config::default();
        config.adapters.insert(
            "zap".into(),
            AdapterSettings {
                timeout_secs: Some(3_600),
                ..Default::default()
            },
        );
        assert_eq!(config.adapter_timeout("zap"), Duration::from_secs(3_600));
        assert_eq!(config.adapter_timeout("nmap"), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"scheduler": {"max_workers": 8}}"#).unwrap();
        assert_eq!(config.scheduler.max_workers, 8);
        assert_eq!(config.scheduler.min_workers, 1);
        assert_eq!(config.cache.ttl_secs, 3_600);
        assert_eq!(config.profiles.entries(ScanProfile::Network).len(), 1);
    }

    #[test]
    fn test_configured_profile_replaces_only_itself() {
        let config: Config =
            serde_json::from_str(r#"{"profiles": {"web": ["nuclei"]}}"#).unwrap();
        assert_eq!(config.profiles.entries(ScanProfile::Web).len(), 1);
        assert_eq!(config.profiles.entries(ScanProfile::Full).len(), 8);
    }
}
