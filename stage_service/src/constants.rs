//! Names, patterns and defaults shared by validation and persistence.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Backend every stage routes to unless a resource says otherwise.
pub const DEFAULT_BACKEND_NAME: &str = "default";

/// Weight forced onto every host under round-robin.
pub const DEFAULT_LB_HOST_WEIGHT: i64 = 100;

pub const MIN_BACKEND_TIMEOUT_IN_SECOND: i64 = 1;
pub const MAX_BACKEND_TIMEOUT_IN_SECOND: i64 = 600;

pub const MAX_STAGE_DESCRIPTION_LENGTH: usize = 512;

pub const MAX_STAGE_VARS_COUNT: usize = 100;
pub const MAX_STAGE_VAR_VALUE_LENGTH: usize = 65535;

/// Lowercased names a stage may not take.
pub const RESERVED_STAGE_NAMES: &[&str] = &["global", "system", "admin", "all"];

pub const HEADER_REWRITE_PLUGIN_CODE: &str = "bk-header-rewrite";

// Placeholder config for non-default backends on a freshly created stage
pub const PLACEHOLDER_BACKEND_TIMEOUT: i64 = 30;
pub const PLACEHOLDER_BACKEND_SCHEME: &str = "http";
pub const PLACEHOLDER_BACKEND_WEIGHT: i64 = 100;

pub static STAGE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]{0,19}$").expect("valid stage name pattern"));

pub static STAGE_VAR_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]{0,49}$").expect("valid var name pattern"));

/// `scheme://host[:port]` with an optional trailing slash. The 3..=255 length
/// bound is checked separately since `regex` has no lookahead.
pub static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<scheme>https?)://(?P<address>[a-zA-Z0-9][-_a-zA-Z0-9]{0,62}(?:\.[a-zA-Z0-9][-_a-zA-Z0-9]{0,62})*(?::\d+)?)/?$",
    )
    .expect("valid domain pattern")
});

pub const DOMAIN_MIN_LENGTH: usize = 3;
pub const DOMAIN_MAX_LENGTH: usize = 255;

pub static HEADER_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]{1,100}$").expect("valid header key pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBalanceType {
    #[serde(rename = "roundrobin", alias = "RR")]
    RoundRobin,
    #[serde(rename = "weighted-roundrobin", alias = "WRR")]
    WeightedRoundRobin,
}

impl LoadBalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceType::RoundRobin => "roundrobin",
            LoadBalanceType::WeightedRoundRobin => "weighted-roundrobin",
        }
    }

    /// Accepts the stored values and the short `RR` / `WRR` forms.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "roundrobin" | "RR" => Some(LoadBalanceType::RoundRobin),
            "weighted-roundrobin" | "WRR" => Some(LoadBalanceType::WeightedRoundRobin),
            _ => None,
        }
    }
}

impl fmt::Display for LoadBalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Draft,
    Released,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Draft => "draft",
            StageStatus::Released => "released",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(StageStatus::Draft),
            "released" => Some(StageStatus::Released),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginBindingScope {
    Stage,
}

impl PluginBindingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginBindingScope::Stage => "stage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_pattern() {
        assert!(STAGE_NAME_PATTERN.is_match("prod"));
        assert!(STAGE_NAME_PATTERN.is_match("pre-release_1"));
        assert!(!STAGE_NAME_PATTERN.is_match("1prod"));
        assert!(!STAGE_NAME_PATTERN.is_match("prod.env"));
        assert!(!STAGE_NAME_PATTERN.is_match("a23456789012345678901"));
    }

    #[test]
    fn test_domain_pattern_captures() {
        let caps = DOMAIN_PATTERN.captures("http://10.0.0.1:8080/").unwrap();
        assert_eq!(&caps["scheme"], "http");
        assert_eq!(&caps["address"], "10.0.0.1:8080");

        assert!(DOMAIN_PATTERN.is_match("https://api.example.com"));
        assert!(!DOMAIN_PATTERN.is_match("10.0.0.1"));
        assert!(!DOMAIN_PATTERN.is_match("ftp://example.com"));
        assert!(!DOMAIN_PATTERN.is_match("http://example.com/path"));
    }

    #[test]
    fn test_load_balance_parse() {
        assert_eq!(LoadBalanceType::parse("RR"), Some(LoadBalanceType::RoundRobin));
        assert_eq!(LoadBalanceType::parse("WRR"), Some(LoadBalanceType::WeightedRoundRobin));
        assert_eq!(
            LoadBalanceType::parse("weighted-roundrobin"),
            Some(LoadBalanceType::WeightedRoundRobin)
        );
        assert_eq!(LoadBalanceType::parse("random"), None);
    }
}
