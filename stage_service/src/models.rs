//! Domain Models
//!
//! Business entities that represent the core domain.
//! These are independent of the database layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    LoadBalanceType, PLACEHOLDER_BACKEND_SCHEME, PLACEHOLDER_BACKEND_TIMEOUT,
    PLACEHOLDER_BACKEND_WEIGHT, StageStatus,
};
use crate::database::{BackendConfigRow, BackendRow, DatabaseError, GatewayRow, StageRow};
use crate::i18n::Lang;
use crate::validation::{Host, ProxyHttpConfig, Upstreams};

#[derive(Debug, Clone, Serialize)]
pub struct Gateway {
    pub id: i64,
    pub name: String,
}

impl From<GatewayRow> for Gateway {
    fn from(row: GatewayRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub id: i64,
    pub gateway_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub description_en: Option<String>,
    pub vars: BTreeMap<String, String>,
    pub status: StageStatus,
    pub micro_gateway_id: Option<Uuid>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Stage {
    /// English callers see `description_en` when one was given.
    pub fn localized_description(&self, lang: Lang) -> Option<&str> {
        match lang {
            Lang::En => self
                .description_en
                .as_deref()
                .filter(|d| !d.is_empty())
                .or(self.description.as_deref()),
            Lang::Zh => self.description.as_deref(),
        }
    }
}

impl TryFrom<StageRow> for Stage {
    type Error = DatabaseError;

    fn try_from(row: StageRow) -> Result<Self, Self::Error> {
        let vars = serde_json::from_str(&row.vars).map_err(|e| {
            DatabaseError::InvalidData(format!("stage {} has malformed vars: {}", row.id, e))
        })?;
        let status = StageStatus::from_str(&row.status).ok_or_else(|| {
            DatabaseError::InvalidData(format!("stage {} has unknown status {}", row.id, row.status))
        })?;
        let micro_gateway_id = row
            .micro_gateway_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|e| {
                DatabaseError::InvalidData(format!("stage {} has malformed micro gateway id: {}", row.id, e))
            })?;

        Ok(Self {
            id: row.id,
            gateway_id: row.gateway_id,
            name: row.name,
            description: row.description,
            description_en: row.description_en,
            vars,
            status,
            micro_gateway_id,
            created_by: row.created_by,
            updated_by: row.updated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub id: i64,
    pub gateway_id: i64,
    pub name: String,
}

impl From<BackendRow> for Backend {
    fn from(row: BackendRow) -> Self {
        Self {
            id: row.id,
            gateway_id: row.gateway_id,
            name: row.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHost {
    pub scheme: String,
    pub host: String,
    pub weight: i64,
}

/// The JSON stored in `backend_configs.config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfigValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub timeout: i64,
    pub loadbalance: LoadBalanceType,
    pub hosts: Vec<BackendHost>,
}

impl BackendConfigValue {
    pub fn from_proxy_http(proxy_http: &ProxyHttpConfig) -> Self {
        let hosts = proxy_http
            .upstreams
            .hosts
            .iter()
            .map(|h| BackendHost {
                scheme: h.scheme.clone(),
                host: h.address.clone(),
                weight: h.weight,
            })
            .collect();

        Self {
            kind: "node".to_string(),
            timeout: proxy_http.timeout,
            loadbalance: proxy_http.upstreams.loadbalance,
            hosts,
        }
    }

    /// Given to every non-default backend when a stage is created; the
    /// operator fills in the real host later.
    pub fn placeholder() -> Self {
        Self {
            kind: "node".to_string(),
            timeout: PLACEHOLDER_BACKEND_TIMEOUT,
            loadbalance: LoadBalanceType::RoundRobin,
            hosts: vec![BackendHost {
                scheme: PLACEHOLDER_BACKEND_SCHEME.to_string(),
                host: String::new(),
                weight: PLACEHOLDER_BACKEND_WEIGHT,
            }],
        }
    }

    pub fn upstreams(&self) -> Upstreams {
        Upstreams {
            loadbalance: self.loadbalance,
            hosts: self
                .hosts
                .iter()
                .map(|h| Host {
                    scheme: h.scheme.clone(),
                    address: h.host.clone(),
                    weight: h.weight,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub id: i64,
    pub gateway_id: i64,
    pub backend_id: i64,
    pub stage_id: i64,
    pub config: BackendConfigValue,
}

impl TryFrom<BackendConfigRow> for BackendConfig {
    type Error = DatabaseError;

    fn try_from(row: BackendConfigRow) -> Result<Self, Self::Error> {
        let config = serde_json::from_str(&row.config).map_err(|e| {
            DatabaseError::InvalidData(format!("backend config {} is malformed: {}", row.id, e))
        })?;
        Ok(Self {
            id: row.id,
            gateway_id: row.gateway_id,
            backend_id: row.backend_id,
            stage_id: row.stage_id,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::TransformHeaders;

    #[test]
    fn test_placeholder_shape() {
        let value = serde_json::to_value(BackendConfigValue::placeholder()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "node",
                "timeout": 30,
                "loadbalance": "roundrobin",
                "hosts": [{"scheme": "http", "host": "", "weight": 100}],
            })
        );
    }

    #[test]
    fn test_from_proxy_http() {
        let proxy_http = ProxyHttpConfig {
            timeout: 45,
            upstreams: Upstreams {
                loadbalance: LoadBalanceType::WeightedRoundRobin,
                hosts: vec![Host {
                    scheme: "https".to_string(),
                    address: "api.example.com:8443".to_string(),
                    weight: 5,
                }],
            },
            transform_headers: TransformHeaders::default(),
        };

        let value = serde_json::to_value(BackendConfigValue::from_proxy_http(&proxy_http)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "node",
                "timeout": 45,
                "loadbalance": "weighted-roundrobin",
                "hosts": [{"scheme": "https", "host": "api.example.com:8443", "weight": 5}],
            })
        );
    }

    #[test]
    fn test_localized_description_falls_back() {
        let stage = Stage {
            id: 1,
            gateway_id: 1,
            name: "prod".to_string(),
            description: Some("生产环境".to_string()),
            description_en: None,
            vars: BTreeMap::new(),
            status: StageStatus::Draft,
            micro_gateway_id: None,
            created_by: "admin".to_string(),
            updated_by: "admin".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(stage.localized_description(Lang::En), Some("生产环境"));

        let stage = Stage {
            description_en: Some("Production".to_string()),
            ..stage
        };
        assert_eq!(stage.localized_description(Lang::En), Some("Production"));
        assert_eq!(stage.localized_description(Lang::Zh), Some("生产环境"));
    }
}
