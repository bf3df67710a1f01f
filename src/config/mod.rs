//! Configuration loading
//!
//! Sources, lowest priority first:
//!
//! 1. `config/default.{toml,yaml,json}`
//! 2. `config/$ENV`
//! 3. `config/local`
//! 4. an explicit `--config` file
//! 5. `VIGIL__SECTION__KEY` environment variables
//!
//! Every file is optional except an explicitly named one. The merged result
//! is deserialized into [`vigil_core::Config`] and validated.

pub mod validation;

use std::path::Path;

use vigil_core::Config;

pub use validation::{Validate, ValidationError};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Load configuration from `./config` and the environment.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigLoadError> {
    load_from_dir(Path::new("config"), explicit)
}

/// Load configuration with `dir` as the configuration directory.
pub fn load_from_dir(dir: &Path, explicit: Option<&Path>) -> Result<Config, ConfigLoadError> {
    let layer = |name: &str| config::File::from(dir.join(name)).required(false);

    let mut builder = config::Config::builder().add_source(layer("default"));
    if let Ok(env) = std::env::var("ENV") {
        builder = builder.add_source(layer(&env));
    }
    builder = builder.add_source(layer("local"));
    if let Some(path) = explicit {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("VIGIL")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;

    tracing::debug!(dir = %dir.display(), "Configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use vigil_core::domain::ScanProfile;

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from_dir(dir.path(), None).unwrap();
        assert_eq!(config.scheduler.max_workers, 3);
        assert_eq!(config.cache.ttl_secs, 3_600);
    }

    #[test]
    fn test_local_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[scheduler]\nmax_workers = 6\nqueue_capacity = 50\n",
        )
        .unwrap();
        fs::write(dir.path().join("local.toml"), "[scheduler]\nmax_workers = 2\n").unwrap();

        let config = load_from_dir(dir.path(), None).unwrap();
        assert_eq!(config.scheduler.max_workers, 2);
        assert_eq!(config.scheduler.queue_capacity, 50);
    }

    #[test]
    fn test_explicit_file_and_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("vigil.toml");
        fs::write(
            &explicit,
            r#"
[adapters.zap]
timeout_secs = 1800

[profiles]
web = ["nuclei", { adapter = "zap", tier = "high" }]
"#,
        )
        .unwrap();

        let config = load_from_dir(dir.path(), Some(&explicit)).unwrap();
        assert_eq!(config.adapter_timeout("zap").as_secs(), 1_800);
        let web = config.profiles.entries(ScanProfile::Web);
        assert_eq!(web.len(), 2);
        assert_eq!(web[1].adapter, "zap");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_from_dir(dir.path(), Some(&missing)),
            Err(ConfigLoadError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[scheduler]\nmin_workers = 5\nmax_workers = 2\n",
        )
        .unwrap();
        assert!(matches!(
            load_from_dir(dir.path(), None),
            Err(ConfigLoadError::Validation(ValidationError::Scheduler { .. }))
        ));
    }
}
