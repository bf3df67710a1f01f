//! Scan targets

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of entity being scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Single IPv4/IPv6 address
    Address,
    /// DNS name
    Hostname,
    /// Absolute http(s) URL
    Url,
    /// CIDR block, e.g. `10.0.0.0/24`
    NetworkRange,
    /// Local checkout or remote git repository
    Repository,
}

impl TargetType {
    pub const ALL: [TargetType; 5] = [
        Self::Address,
        Self::Hostname,
        Self::Url,
        Self::NetworkRange,
        Self::Repository,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Hostname => "hostname",
            Self::Url => "url",
            Self::NetworkRange => "network_range",
            Self::Repository => "repository",
        }
    }

    /// Classify a raw target string.
    ///
    /// Order matters: an IP literal is never treated as a hostname, and a
    /// path that exists on disk wins over hostname classification.
    pub fn infer(value: &str) -> Self {
        let value = value.trim();

        if value.parse::<IpAddr>().is_ok() {
            return Self::Address;
        }

        if let Some((addr, prefix)) = value.split_once('/')
            && addr.parse::<IpAddr>().is_ok()
            && prefix.parse::<u8>().is_ok()
        {
            return Self::NetworkRange;
        }

        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Self::Url;
        }

        if lower.ends_with(".git") || lower.starts_with("git@") || Path::new(value).is_dir() {
            return Self::Repository;
        }

        Self::Hostname
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a target type name is not recognized
#[derive(Debug, thiserror::Error)]
#[error("Unknown target type: {0}")]
pub struct UnknownTargetType(pub String);

impl FromStr for TargetType {
    type Err = UnknownTargetType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "address" | "ip" => Ok(Self::Address),
            "hostname" | "domain" | "host" => Ok(Self::Hostname),
            "url" => Ok(Self::Url),
            "network_range" | "network-range" | "cidr" | "network" => Ok(Self::NetworkRange),
            "repository" | "repo" | "path" => Ok(Self::Repository),
            other => Err(UnknownTargetType(other.to_string())),
        }
    }
}

/// Identity of a target: its type plus its value.
///
/// Scans reference targets by identity only; the record itself is owned by
/// the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub target_type: TargetType,
    pub value: String,
}

impl TargetIdentity {
    pub fn new(target_type: TargetType, value: impl Into<String>) -> Self {
        Self {
            target_type,
            value: value.into().trim().to_string(),
        }
    }

    /// Build an identity by inferring the type from the value.
    pub fn infer(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::new(TargetType::infer(&value), value)
    }

    /// URL that web-focused tools should be pointed at.
    ///
    /// Hostnames default to https, bare addresses to http.
    pub fn web_url(&self) -> Option<String> {
        match self.target_type {
            TargetType::Url => Some(self.value.clone()),
            TargetType::Hostname => Some(format!("https://{}", self.value)),
            TargetType::Address => Some(format!("http://{}", self.value)),
            TargetType::NetworkRange | TargetType::Repository => None,
        }
    }

    /// Host component of the target, if it has one.
    pub fn host(&self) -> Option<String> {
        match self.target_type {
            TargetType::Address | TargetType::Hostname => Some(self.value.clone()),
            TargetType::Url => {
                let rest = self
                    .value
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(&self.value);
                let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
                let host = authority.rsplit('@').next().unwrap_or(authority);
                let host = match host.rsplit_once(':') {
                    Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
                    _ => host,
                };
                Some(host.trim_matches(['[', ']']).to_string())
            }
            TargetType::NetworkRange | TargetType::Repository => None,
        }
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_type, self.value)
    }
}

/// Persisted target record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub identity: TargetIdentity,
    pub created_at: DateTime<Utc>,
    pub last_scanned: Option<DateTime<Utc>>,
}

impl Target {
    pub fn new(identity: TargetIdentity) -> Self {
        Self {
            identity,
            created_at: Utc::now(),
            last_scanned: None,
        }
    }

    pub fn mark_scanned(&mut self, at: DateTime<Utc>) {
        self.last_scanned = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("192.168.1.10", TargetType::Address)]
    #[case("::1", TargetType::Address)]
    #[case("10.0.0.0/24", TargetType::NetworkRange)]
    #[case("https://example.com/login", TargetType::Url)]
    #[case("HTTP://example.com", TargetType::Url)]
    #[case("git@github.com:org/repo.git", TargetType::Repository)]
    #[case("https://github.com/org/repo.git", TargetType::Url)]
    #[case("example.com", TargetType::Hostname)]
    fn test_infer_target_type(#[case] value: &str, #[case] expected: TargetType) {
        assert_eq!(TargetType::infer(value), expected);
    }

    #[test]
    fn test_infer_existing_directory_is_repository() {
        let dir = std::env::temp_dir();
        assert_eq!(
            TargetType::infer(dir.to_str().unwrap()),
            TargetType::Repository
        );
    }

    #[rstest]
    #[case("ip", TargetType::Address)]
    #[case("domain", TargetType::Hostname)]
    #[case("cidr", TargetType::NetworkRange)]
    #[case("repo", TargetType::Repository)]
    fn test_target_type_aliases(#[case] name: &str, #[case] expected: TargetType) {
        assert_eq!(name.parse::<TargetType>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_target_type_is_rejected() {
        assert!("mainframe".parse::<TargetType>().is_err());
    }

    #[test]
    fn test_web_url_derivation() {
        let host = TargetIdentity::new(TargetType::Hostname, "example.com");
        assert_eq!(host.web_url().as_deref(), Some("https://example.com"));

        let ip = TargetIdentity::new(TargetType::Address, "10.1.1.1");
        assert_eq!(ip.web_url().as_deref(), Some("http://10.1.1.1"));

        let range = TargetIdentity::new(TargetType::NetworkRange, "10.0.0.0/8");
        assert!(range.web_url().is_none());
    }

    #[test]
    fn test_host_from_url() {
        let url = TargetIdentity::new(TargetType::Url, "https://user@example.com:8443/a?b=c");
        assert_eq!(url.host().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_identity_trims_value() {
        let id = TargetIdentity::new(TargetType::Hostname, "  example.com \n");
        assert_eq!(id.value, "example.com");
        assert_eq!(id.to_string(), "hostname:example.com");
    }
}
