//! Target resolution shared by adapters

use std::path::PathBuf;

use vigil_core::domain::{AdapterError, TargetIdentity, TargetType};

/// Local directory for repository-scanning tools.
///
/// Remote repositories have to be checked out by the caller first.
pub(crate) fn repository_path(tool: &str, target: &TargetIdentity) -> Result<PathBuf, AdapterError> {
    if target.target_type != TargetType::Repository {
        return Err(AdapterError::failure(
            tool,
            format!("{} targets are not supported", target.target_type),
        ));
    }
    let path = PathBuf::from(&target.value);
    if !path.is_dir() {
        return Err(AdapterError::failure(
            tool,
            format!("{} is not a local directory", target.value),
        ));
    }
    Ok(path)
}

/// URL for web-focused tools.
pub(crate) fn web_url(tool: &str, target: &TargetIdentity) -> Result<String, AdapterError> {
    target.web_url().ok_or_else(|| {
        AdapterError::failure(
            tool,
            format!("cannot derive a URL from {} target", target.target_type),
        )
    })
}

/// Host or range argument for network tools.
pub(crate) fn network_target(tool: &str, target: &TargetIdentity) -> Result<String, AdapterError> {
    match target.target_type {
        TargetType::Address | TargetType::Hostname | TargetType::NetworkRange => {
            Ok(target.value.clone())
        }
        TargetType::Url => target
            .host()
            .ok_or_else(|| AdapterError::failure(tool, "URL has no host component")),
        TargetType::Repository => Err(AdapterError::failure(
            tool,
            "repository targets are not supported",
        )),
    }
}

/// Elapsed milliseconds since `started`.
pub(crate) fn millis_since(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
