//! Adapter selection for a scan request
//!
//! Candidates come from the profile (or the request's explicit list) in
//! order. Each candidate is kept only if it is registered and supports the
//! target type; compatible adapters whose tool is missing become skipped
//! runs instead of tasks.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use vigil_core::config::{ProfileEntry, ProfilesConfig};
use vigil_core::domain::{FailureReason, PriorityTier, ScannerAdapter};

use crate::domain::ScanRequest;
use crate::infrastructure::registry::AdapterRegistry;

/// Adapter that will be scheduled
#[derive(Clone)]
pub struct AdmittedAdapter {
    pub adapter: Arc<dyn ScannerAdapter>,
    pub tier: PriorityTier,
    /// Index in the candidate list; breaks ties between equal tiers
    pub position: usize,
}

impl AdmittedAdapter {
    pub fn name(&self) -> &str {
        self.adapter.name()
    }
}

/// Compatible adapter that could not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedAdapter {
    pub adapter: String,
    pub tier: PriorityTier,
    pub reason: String,
}

#[derive(Default)]
pub struct Selection {
    pub admitted: Vec<AdmittedAdapter>,
    pub skipped: Vec<SkippedAdapter>,
}

impl Selection {
    /// Why the scan cannot run, if nothing was admitted.
    pub fn failure(&self) -> Option<FailureReason> {
        if !self.admitted.is_empty() {
            None
        } else if self.skipped.is_empty() {
            Some(FailureReason::NoApplicableAdapters)
        } else {
            Some(FailureReason::NoAvailableAdapters)
        }
    }

    pub fn admitted_names(&self) -> Vec<String> {
        self.admitted.iter().map(|a| a.name().to_string()).collect()
    }
}

pub fn select_adapters(
    registry: &AdapterRegistry,
    profiles: &ProfilesConfig,
    request: &ScanRequest,
) -> Selection {
    let candidates: Vec<ProfileEntry> = match &request.adapters {
        Some(names) => names.iter().map(ProfileEntry::named).collect(),
        None => profiles.entries(request.profile).to_vec(),
    };
    let target_type = request.target.target_type;

    let mut seen = HashSet::new();
    let mut selection = Selection::default();
    for (position, entry) in candidates.into_iter().enumerate() {
        if !seen.insert(entry.adapter.clone()) {
            continue;
        }
        let Some(adapter) = registry.get(&entry.adapter) else {
            debug!(adapter = %entry.adapter, "Profile adapter is not registered");
            continue;
        };
        let descriptor = adapter.descriptor();
        if !descriptor.supports(target_type, request.profile) {
            continue;
        }

        let tier = entry.tier.unwrap_or(descriptor.default_tier);
        if adapter.is_available() {
            selection.admitted.push(AdmittedAdapter {
                adapter,
                tier,
                position,
            });
        } else {
            let reason = match &descriptor.binary {
                Some(binary) => format!("{} not found on PATH", binary),
                None => "tool unavailable".to_string(),
            };
            selection.skipped.push(SkippedAdapter {
                adapter: entry.adapter,
                tier,
                reason,
            });
        }
    }
    selection
}
