//! Vigil Adapters - Integrated scanner tools
//!
//! Each module wraps one tool behind [`ScannerAdapter`] and normalizes its
//! output into [`vigil_core::domain::FindingRecord`]s. The set of tools is
//! closed: [`AdapterKind`] enumerates every variant and is the static
//! registry the orchestrator is populated from.
//!
//! ```text
//! vigil-adapters
//! ├── process     cancellable subprocess runner (SIGTERM → grace → kill)
//! ├── secrets     built-in regex secret scanner (no external binary)
//! ├── gitleaks    git history secret scanning
//! ├── semgrep     static analysis
//! ├── trivy       dependency / misconfiguration scanning
//! ├── nmap        port and service discovery, NSE vuln scripts
//! ├── nuclei      template-based web checks
//! ├── nikto       web server checks
//! └── zap         OWASP ZAP quick scan
//! ```

pub mod gitleaks;
pub mod nikto;
pub mod nmap;
pub mod nuclei;
pub mod process;
pub mod secrets;
pub mod semgrep;
mod target;
pub mod trivy;
pub mod zap;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use vigil_core::Config;
use vigil_core::config::AdapterSettings;
use vigil_core::domain::ScannerAdapter;

pub use gitleaks::GitleaksAdapter;
pub use nikto::NiktoAdapter;
pub use nmap::NmapAdapter;
pub use nuclei::NucleiAdapter;
pub use process::{ToolCommand, ToolOutput, ToolRuntime};
pub use secrets::SecretsAdapter;
pub use semgrep::SemgrepAdapter;
pub use trivy::TrivyAdapter;
pub use zap::ZapAdapter;

/// Every integrated tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Secrets,
    Gitleaks,
    Semgrep,
    Trivy,
    Nmap,
    Nuclei,
    Nikto,
    Zap,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 8] = [
        Self::Secrets,
        Self::Gitleaks,
        Self::Semgrep,
        Self::Trivy,
        Self::Nmap,
        Self::Nuclei,
        Self::Nikto,
        Self::Zap,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Secrets => secrets::NAME,
            Self::Gitleaks => gitleaks::NAME,
            Self::Semgrep => semgrep::NAME,
            Self::Trivy => trivy::NAME,
            Self::Nmap => nmap::NAME,
            Self::Nuclei => nuclei::NAME,
            Self::Nikto => nikto::NAME,
            Self::Zap => zap::NAME,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Instantiate the adapter with its configured overrides.
    pub fn build(
        &self,
        settings: &AdapterSettings,
        termination_grace: Duration,
    ) -> Arc<dyn ScannerAdapter> {
        match self {
            Self::Secrets => Arc::new(SecretsAdapter::new()),
            Self::Gitleaks => Arc::new(GitleaksAdapter::new(ToolRuntime::from_settings(
                gitleaks::NAME,
                gitleaks::BINARY,
                settings,
                termination_grace,
            ))),
            Self::Semgrep => Arc::new(SemgrepAdapter::new(ToolRuntime::from_settings(
                semgrep::NAME,
                semgrep::BINARY,
                settings,
                termination_grace,
            ))),
            Self::Trivy => Arc::new(TrivyAdapter::new(ToolRuntime::from_settings(
                trivy::NAME,
                trivy::BINARY,
                settings,
                termination_grace,
            ))),
            Self::Nmap => Arc::new(NmapAdapter::new(ToolRuntime::from_settings(
                nmap::NAME,
                nmap::BINARY,
                settings,
                termination_grace,
            ))),
            Self::Nuclei => Arc::new(NucleiAdapter::new(ToolRuntime::from_settings(
                nuclei::NAME,
                nuclei::BINARY,
                settings,
                termination_grace,
            ))),
            Self::Nikto => Arc::new(NiktoAdapter::new(ToolRuntime::from_settings(
                nikto::NAME,
                nikto::BINARY,
                settings,
                termination_grace,
            ))),
            Self::Zap => Arc::new(ZapAdapter::new(ToolRuntime::from_settings(
                zap::NAME,
                zap::BINARY,
                settings,
                termination_grace,
            ))),
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build every adapter that is not disabled in configuration.
pub fn builtin_adapters(config: &Config) -> Vec<Arc<dyn ScannerAdapter>> {
    let grace = config.scan.termination_grace();
    AdapterKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let settings = config.adapter_settings(kind.name());
            if settings.disabled {
                tracing::info!(adapter = kind.name(), "Adapter disabled by configuration");
                None
            } else {
                Some(kind.build(&settings, grace))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::domain::{ScanProfile, TargetType};

    #[test]
    fn test_names_round_trip() {
        for kind in AdapterKind::ALL {
            assert_eq!(AdapterKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(AdapterKind::from_name("sqlmap"), None);
    }

    #[test]
    fn test_descriptor_names_match_kinds() {
        for kind in AdapterKind::ALL {
            let adapter = kind.build(&AdapterSettings::default(), Duration::from_secs(1));
            assert_eq!(adapter.name(), kind.name());
        }
    }

    #[test]
    fn test_disabled_adapters_are_not_built() {
        let mut config = Config::default();
        config.adapters.insert(
            "zap".into(),
            AdapterSettings {
                disabled: true,
                ..Default::default()
            },
        );
        let adapters = builtin_adapters(&config);
        assert_eq!(adapters.len(), AdapterKind::ALL.len() - 1);
        assert!(adapters.iter().all(|a| a.name() != "zap"));
    }

    #[test]
    fn test_web_adapters_need_full_profile_for_addresses() {
        for kind in [AdapterKind::Nuclei, AdapterKind::Nikto, AdapterKind::Zap] {
            let adapter = kind.build(&AdapterSettings::default(), Duration::from_secs(1));
            let d = adapter.descriptor();
            assert!(d.supports(TargetType::Hostname, ScanProfile::Web));
            assert!(!d.supports(TargetType::Address, ScanProfile::Web));
            assert!(d.supports(TargetType::Address, ScanProfile::Full));
        }
    }

    #[test]
    fn test_code_adapters_only_accept_repositories() {
        for kind in [
            AdapterKind::Secrets,
            AdapterKind::Gitleaks,
            AdapterKind::Semgrep,
            AdapterKind::Trivy,
        ] {
            let adapter = kind.build(&AdapterSettings::default(), Duration::from_secs(1));
            let d = adapter.descriptor();
            assert!(d.supports(TargetType::Repository, ScanProfile::Quick));
            assert!(!d.supports(TargetType::Hostname, ScanProfile::Full));
        }
    }
}
