//! Profiles Command - show what each scan profile runs

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use vigil_adapters::AdapterKind;
use vigil_core::Config;
use vigil_core::domain::{PriorityTier, ScanProfile};

use crate::cli::context::CliContext;
use crate::cli::exit_codes;
use crate::cli::output::OutputFormat;

/// Arguments for the profiles command
#[derive(Args, Debug)]
pub struct ProfilesArgs {
    /// Show only this profile
    pub profile: Option<ScanProfile>,
}

/// One adapter slot with its effective tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSlot {
    pub profile: ScanProfile,
    pub adapter: String,
    pub tier: PriorityTier,
    pub disabled: bool,
}

/// Resolve the configured profiles into ordered slots.
pub fn slots(config: &Config, only: Option<ScanProfile>) -> Vec<ProfileSlot> {
    let grace = config.scan.termination_grace();
    ScanProfile::ALL
        .into_iter()
        .filter(|p| only.is_none_or(|only| only == *p))
        .flat_map(|profile| {
            config
                .profiles
                .entries(profile)
                .iter()
                .map(move |entry| {
                    let settings = config.adapter_settings(&entry.adapter);
                    let default_tier = AdapterKind::from_name(&entry.adapter)
                        .map(|kind| kind.build(&settings, grace).descriptor().default_tier)
                        .unwrap_or(PriorityTier::Standard);
                    ProfileSlot {
                        profile,
                        adapter: entry.adapter.clone(),
                        tier: entry.tier.unwrap_or(default_tier),
                        disabled: settings.disabled,
                    }
                })
        })
        .collect()
}

pub fn run(ctx: &CliContext, args: &ProfilesArgs) -> Result<i32> {
    let slots = slots(&ctx.config, args.profile);

    if ctx.output.format() == OutputFormat::Json {
        ctx.output.json(&slots)?;
        return Ok(exit_codes::SUCCESS);
    }

    let rows: Vec<Vec<String>> = slots
        .iter()
        .map(|slot| {
            vec![
                slot.profile.to_string(),
                slot.adapter.clone(),
                slot.tier.to_string(),
                if slot.disabled { "disabled" } else { "" }.to_string(),
            ]
        })
        .collect();
    ctx.output.table(&["PROFILE", "ADAPTER", "TIER", "NOTE"], &rows)?;
    Ok(exit_codes::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::config::{AdapterSettings, ProfileEntry};

    #[test]
    fn test_slots_apply_tier_override() {
        let mut config = Config::default();
        config.profiles.0.insert(
            ScanProfile::Web,
            vec![
                ProfileEntry::named("nuclei"),
                ProfileEntry::named("zap").with_tier(PriorityTier::Critical),
            ],
        );

        let web = slots(&config, Some(ScanProfile::Web));
        assert_eq!(web.len(), 2);
        assert_eq!(web[1].adapter, "zap");
        assert_eq!(web[1].tier, PriorityTier::Critical);
        assert!(web.iter().all(|s| s.profile == ScanProfile::Web));
    }

    #[test]
    fn test_slots_mark_disabled_adapters() {
        let mut config = Config::default();
        config.adapters.insert(
            "nmap".into(),
            AdapterSettings {
                disabled: true,
                ..Default::default()
            },
        );
        let network = slots(&config, Some(ScanProfile::Network));
        assert_eq!(network.len(), 1);
        assert!(network[0].disabled);
    }
}
