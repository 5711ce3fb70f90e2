//! Validators for the `proxy_http` block: timeout, upstreams and header transforms.

use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::{BlockValidator, Field, NON_FIELD_ERRORS, OptionalField, ValidationErrors};
use crate::constants::{
    DEFAULT_LB_HOST_WEIGHT, DOMAIN_MAX_LENGTH, DOMAIN_MIN_LENGTH, DOMAIN_PATTERN,
    HEADER_KEY_PATTERN, LoadBalanceType, MAX_BACKEND_TIMEOUT_IN_SECOND,
    MIN_BACKEND_TIMEOUT_IN_SECOND,
};
use crate::i18n::{ErrorMessage, ValueKind};

// ============================================================================
// Raw input
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostInput {
    pub host: Option<Field<String>>,
    pub weight: Option<Field<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamsInput {
    pub loadbalance: Option<Field<String>>,
    pub hosts: Option<Field<Vec<Field<HostInput>>>>,
}

impl UpstreamsInput {
    pub fn is_empty(&self) -> bool {
        self.loadbalance.is_none() && self.hosts.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransformHeadersInput {
    pub set: Option<Field<BTreeMap<String, Field<String>>>>,
    pub delete: Option<Field<Vec<Field<String>>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyHttpInput {
    pub timeout: Option<Field<i64>>,
    pub upstreams: Option<Field<UpstreamsInput>>,
    pub transform_headers: Option<Field<TransformHeadersInput>>,
}

// ============================================================================
// Validated output
// ============================================================================

/// An upstream host already split into scheme and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub scheme: String,
    pub address: String,
    pub weight: i64,
}

impl Host {
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

impl Serialize for Host {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Host", 2)?;
        state.serialize_field("host", &self.url())?;
        state.serialize_field("weight", &self.weight)?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upstreams {
    pub loadbalance: LoadBalanceType,
    pub hosts: Vec<Host>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformHeaders {
    pub set: BTreeMap<String, String>,
    pub delete: Vec<String>,
}

impl TransformHeaders {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyHttpConfig {
    pub timeout: i64,
    pub upstreams: Upstreams,
    pub transform_headers: TransformHeaders,
}

// ============================================================================
// Host
// ============================================================================

struct HostDraft {
    scheme: String,
    address: String,
    weight: Option<i64>,
}

/// Split `scheme://address[/]` into its parts. Anything that does not have
/// that exact shape is rejected here instead of failing later on the split.
pub fn parse_host(raw: &str) -> Option<(String, String)> {
    if raw.len() < DOMAIN_MIN_LENGTH || raw.len() > DOMAIN_MAX_LENGTH {
        return None;
    }
    let caps = DOMAIN_PATTERN.captures(raw)?;
    Some((caps["scheme"].to_string(), caps["address"].to_string()))
}

fn validate_host(input: &HostInput) -> Result<HostDraft, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let parsed = match input.host.typed(ValueKind::String) {
        Err(message) => {
            errors.add("host", message);
            None
        }
        Ok(None) => {
            errors.add("host", ErrorMessage::Required);
            None
        }
        Ok(Some(raw)) => {
            let parsed = parse_host(raw);
            if parsed.is_none() {
                errors.add("host", ErrorMessage::InvalidHost);
            }
            parsed
        }
    };

    let weight = match input.weight.typed(ValueKind::Integer) {
        Err(message) => {
            errors.add("weight", message);
            None
        }
        Ok(weight) => weight.copied(),
    };
    if weight.is_some_and(|w| w < 1) {
        errors.add("weight", ErrorMessage::HostWeightTooSmall);
    }

    let (scheme, address) = match parsed {
        Some(parts) if errors.is_empty() => parts,
        _ => return Err(errors),
    };

    Ok(HostDraft {
        scheme,
        address,
        weight,
    })
}

// ============================================================================
// Upstreams
// ============================================================================

/// With `allow_empty`, an omitted or `{}` block validates to `None` and no
/// host rules are applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamsValidator {
    pub allow_empty: bool,
}

impl UpstreamsValidator {
    pub fn new(allow_empty: bool) -> Self {
        Self { allow_empty }
    }
}

impl BlockValidator for UpstreamsValidator {
    type Input = UpstreamsInput;
    type Output = Option<Upstreams>;

    fn validate(&self, input: Option<&UpstreamsInput>) -> Result<Option<Upstreams>, ValidationErrors> {
        let input = match input {
            Some(input) if !input.is_empty() => input,
            _ if self.allow_empty => return Ok(None),
            None => return Err(ValidationErrors::single(NON_FIELD_ERRORS, ErrorMessage::Required)),
            Some(input) => input,
        };

        let mut errors = ValidationErrors::new();

        let loadbalance = match input.loadbalance.typed(ValueKind::String) {
            Err(message) => {
                errors.add("loadbalance", message);
                None
            }
            Ok(None) => {
                errors.add("loadbalance", ErrorMessage::Required);
                None
            }
            Ok(Some(raw)) => {
                let parsed = LoadBalanceType::parse(raw);
                if parsed.is_none() {
                    errors.add("loadbalance", ErrorMessage::InvalidLoadBalance(raw.to_string()));
                }
                parsed
            }
        };

        let mut drafts = Vec::new();
        match input.hosts.typed(ValueKind::List) {
            Err(message) => errors.add("hosts", message),
            Ok(None) => errors.add("hosts", ErrorMessage::Required),
            Ok(Some(hosts)) if hosts.is_empty() => errors.add("hosts", ErrorMessage::EmptyHosts),
            Ok(Some(hosts)) => {
                let mut host_errors = ValidationErrors::new();
                for (index, host) in hosts.iter().enumerate() {
                    let key = format!("[{}]", index);
                    match host.typed(ValueKind::Object) {
                        Err(message) => host_errors.add(key, message),
                        Ok(host) => {
                            if let Some(draft) = host_errors.collect(&key, validate_host(host)) {
                                drafts.push(draft);
                            }
                        }
                    }
                }
                errors.nest("hosts", host_errors);
            }
        }

        let loadbalance = match loadbalance {
            Some(lb) if errors.is_empty() => lb,
            _ => return Err(errors),
        };

        let hosts = match loadbalance {
            LoadBalanceType::RoundRobin => drafts
                .into_iter()
                .map(|d| Host {
                    scheme: d.scheme,
                    address: d.address,
                    weight: DEFAULT_LB_HOST_WEIGHT,
                })
                .collect(),
            LoadBalanceType::WeightedRoundRobin => {
                let mut hosts = Vec::with_capacity(drafts.len());
                for d in drafts {
                    match d.weight {
                        Some(weight) => hosts.push(Host {
                            scheme: d.scheme,
                            address: d.address,
                            weight,
                        }),
                        None => {
                            return Err(ValidationErrors::single(
                                NON_FIELD_ERRORS,
                                ErrorMessage::WeightRequired,
                            ));
                        }
                    }
                }
                hosts
            }
        };

        Ok(Some(Upstreams { loadbalance, hosts }))
    }
}

// ============================================================================
// Transform headers
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct TransformHeadersValidator;

fn all_header_keys_valid<'a>(mut keys: impl Iterator<Item = &'a String>) -> bool {
    keys.all(|key| HEADER_KEY_PATTERN.is_match(key))
}

impl BlockValidator for TransformHeadersValidator {
    type Input = TransformHeadersInput;
    type Output = TransformHeaders;

    fn validate(&self, input: Option<&TransformHeadersInput>) -> Result<TransformHeaders, ValidationErrors> {
        let Some(input) = input else {
            return Ok(TransformHeaders::default());
        };

        let mut errors = ValidationErrors::new();

        // Values are checked per key: `set.X-Env`
        let mut set = BTreeMap::new();
        match input.set.typed(ValueKind::Object) {
            Err(message) => errors.add("set", message),
            Ok(None) => {}
            Ok(Some(raw)) => {
                for (key, value) in raw {
                    match value.typed(ValueKind::String) {
                        Err(message) => errors.add(format!("set.{}", key), message),
                        Ok(value) if value.trim().is_empty() => {
                            errors.add(format!("set.{}", key), ErrorMessage::Blank)
                        }
                        Ok(value) => {
                            set.insert(key.clone(), value.clone());
                        }
                    }
                }
                if !all_header_keys_valid(raw.keys()) {
                    errors.add("set", ErrorMessage::InvalidHeaderKey);
                }
            }
        }

        let mut delete = Vec::new();
        match input.delete.typed(ValueKind::List) {
            Err(message) => errors.add("delete", message),
            Ok(None) => {}
            Ok(Some(raw)) => {
                for (index, key) in raw.iter().enumerate() {
                    match key.typed(ValueKind::String) {
                        Err(message) => errors.add(format!("delete[{}]", index), message),
                        Ok(key) => delete.push(key.clone()),
                    }
                }
                if !all_header_keys_valid(delete.iter()) {
                    errors.add("delete", ErrorMessage::InvalidHeaderKey);
                }
            }
        }

        errors.into_result(TransformHeaders { set, delete })
    }
}

// ============================================================================
// proxy_http
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyHttpValidator;

impl BlockValidator for ProxyHttpValidator {
    type Input = ProxyHttpInput;
    type Output = ProxyHttpConfig;

    fn validate(&self, input: Option<&ProxyHttpInput>) -> Result<ProxyHttpConfig, ValidationErrors> {
        let Some(input) = input else {
            return Err(ValidationErrors::single(NON_FIELD_ERRORS, ErrorMessage::Required));
        };

        let mut errors = ValidationErrors::new();

        let timeout = match input.timeout.typed(ValueKind::Integer) {
            Err(message) => {
                errors.add("timeout", message);
                None
            }
            Ok(None) => {
                errors.add("timeout", ErrorMessage::Required);
                None
            }
            Ok(Some(&t)) if !(MIN_BACKEND_TIMEOUT_IN_SECOND..=MAX_BACKEND_TIMEOUT_IN_SECOND).contains(&t) => {
                errors.add(
                    "timeout",
                    ErrorMessage::TimeoutOutOfRange {
                        min: MIN_BACKEND_TIMEOUT_IN_SECOND,
                        max: MAX_BACKEND_TIMEOUT_IN_SECOND,
                    },
                );
                None
            }
            Ok(Some(&t)) => Some(t),
        };

        let upstreams = match input.upstreams.typed(ValueKind::Object) {
            Err(message) => {
                errors.add("upstreams", message);
                None
            }
            Ok(upstreams) => errors
                .collect("upstreams", UpstreamsValidator::new(false).validate(upstreams))
                .flatten(),
        };

        let transform_headers = match input.transform_headers.typed(ValueKind::Object) {
            Err(message) => {
                errors.add("transform_headers", message);
                None
            }
            Ok(headers) => errors.collect("transform_headers", TransformHeadersValidator.validate(headers)),
        };

        match (timeout, upstreams, transform_headers) {
            (Some(timeout), Some(upstreams), Some(transform_headers)) if errors.is_empty() => {
                Ok(ProxyHttpConfig {
                    timeout,
                    upstreams,
                    transform_headers,
                })
            }
            _ => Err(errors),
        }
    }
}
