//! Structured logging setup

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::config::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoggingInitError {
    #[error("Invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Unknown log format '{0}' (expected json, pretty or compact)")]
    Format(String),

    #[error("Failed to install global subscriber: {0}")]
    Install(String),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Logs go to stderr so
/// command output on stdout stays machine-readable.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|source| LoggingInitError::Filter {
            filter: config.level.clone(),
            source,
        })?,
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match config.format.to_ascii_lowercase().as_str() {
        "json" => builder.json().with_current_span(false).try_init(),
        "pretty" => builder.pretty().try_init(),
        "compact" => builder.compact().try_init(),
        other => return Err(LoggingInitError::Format(other.to_string())),
    };

    result.map_err(|e| LoggingInitError::Install(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_is_rejected() {
        let config = LoggingConfig {
            level: "info".into(),
            format: "xml".into(),
        };
        assert!(matches!(
            init_tracing(&config),
            Err(LoggingInitError::Format(_))
        ));
    }
}
