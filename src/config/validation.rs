//! Configuration validation module

use vigil_adapters::AdapterKind;
use vigil_core::Config;
use vigil_core::config::{CacheConfig, LoggingConfig, ScanConfig, SchedulerConfig};

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Scheduler configuration error: {message}")]
    Scheduler { message: String },

    #[error("Scan configuration error: {message}")]
    Scan { message: String },

    #[error("Cache configuration error: {message}")]
    Cache { message: String },

    #[error("Adapter configuration error: {message}")]
    Adapter { message: String },

    #[error("Profile configuration error: {message}")]
    Profile { message: String },

    #[error("Logging configuration error: {message}")]
    Logging { message: String },
}

impl ValidationError {
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }

    pub fn scan(message: impl Into<String>) -> Self {
        Self::Scan {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
        }
    }

    pub fn profile(message: impl Into<String>) -> Self {
        Self::Profile {
            message: message.into(),
        }
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }
}

fn check_ratio(name: &str, value: f32) -> Result<(), ValidationError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ValidationError::scheduler(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )))
    }
}

impl Validate for SchedulerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.min_workers == 0 {
            return Err(ValidationError::scheduler("min_workers must be at least 1"));
        }
        if self.max_workers < self.min_workers {
            return Err(ValidationError::scheduler(format!(
                "max_workers ({}) must not be below min_workers ({})",
                self.max_workers, self.min_workers
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::scheduler("queue_capacity must be greater than 0"));
        }
        if self.poll_interval_ms < 10 {
            return Err(ValidationError::scheduler("poll_interval_ms must be at least 10"));
        }

        check_ratio("cpu_high_water", self.cpu_high_water)?;
        check_ratio("cpu_low_water", self.cpu_low_water)?;
        check_ratio("memory_high_water", self.memory_high_water)?;
        check_ratio("memory_low_water", self.memory_low_water)?;
        if self.cpu_low_water >= self.cpu_high_water {
            return Err(ValidationError::scheduler(
                "cpu_low_water must be below cpu_high_water",
            ));
        }
        if self.memory_low_water >= self.memory_high_water {
            return Err(ValidationError::scheduler(
                "memory_low_water must be below memory_high_water",
            ));
        }
        Ok(())
    }
}

impl Validate for ScanConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.default_timeout_secs == 0 {
            return Err(ValidationError::scan("default_timeout_secs must be greater than 0"));
        }
        if self.event_buffer == 0 {
            return Err(ValidationError::scan("event_buffer must be greater than 0"));
        }
        Ok(())
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.enabled {
            return Ok(());
        }
        if self.ttl_secs == 0 {
            return Err(ValidationError::cache("ttl_secs must be greater than 0"));
        }
        if self.max_entries == 0 {
            return Err(ValidationError::cache("max_entries must be greater than 0"));
        }
        if let Some(dir) = &self.dir {
            if dir.as_os_str().is_empty() {
                return Err(ValidationError::cache("dir cannot be empty"));
            }
            if dir.is_file() {
                return Err(ValidationError::cache(format!(
                    "dir {} is a file",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.level.trim().is_empty() {
            return Err(ValidationError::logging("level cannot be empty"));
        }
        match self.format.to_ascii_lowercase().as_str() {
            "json" | "pretty" | "compact" => Ok(()),
            other => Err(ValidationError::logging(format!(
                "format must be json, pretty or compact, got '{}'",
                other
            ))),
        }
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.scheduler.validate()?;
        self.scan.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;

        for (name, settings) in &self.adapters {
            if AdapterKind::from_name(name).is_none() {
                return Err(ValidationError::adapter(format!("unknown adapter '{}'", name)));
            }
            if settings.timeout_secs == Some(0) {
                return Err(ValidationError::adapter(format!(
                    "{}: timeout_secs must be greater than 0",
                    name
                )));
            }
        }

        for (profile, entries) in &self.profiles.0 {
            if entries.is_empty() {
                return Err(ValidationError::profile(format!(
                    "profile '{}' has no adapters",
                    profile
                )));
            }
            if let Some(entry) = entries
                .iter()
                .find(|e| AdapterKind::from_name(&e.adapter).is_none())
            {
                return Err(ValidationError::profile(format!(
                    "profile '{}' references unknown adapter '{}'",
                    profile, entry.adapter
                )));
            }
        }
        Ok(())
    }
}
