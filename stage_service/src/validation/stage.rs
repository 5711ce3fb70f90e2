//! Top-level stage validation.
//!
//! Runs in two phases, like a declarative serializer: per-field rules first,
//! then the cross-row checks (name uniqueness, quota, micro gateway binding)
//! once every field is well formed.

use std::collections::BTreeMap;

use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{
    BlockValidator, Field, MaxCountPerGatewayValidator, NON_FIELD_ERRORS, NameValidator, OptionalField,
    ProxyHttpConfig, ProxyHttpInput, ProxyHttpValidator, StageVarsValidator, ValidationErrors, present,
};
use crate::constants::{MAX_STAGE_DESCRIPTION_LENGTH, STAGE_NAME_PATTERN};
use crate::error::Result;
use crate::i18n::{ErrorMessage, ValueKind};
use crate::models::Stage;
use crate::stores;

/// Request body for create and update. Unknown keys such as `status`,
/// `gateway` or `created_by` are dropped on deserialization.
///
/// The descriptions and `micro_gateway_id` distinguish an omitted key
/// (`None`, keep the stored value on update) from an explicit `null`
/// (`Some(None)`, clear it).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageInput {
    pub name: Option<Field<String>>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<Field<String>>>,
    #[serde(default, deserialize_with = "present")]
    pub description_en: Option<Option<Field<String>>>,
    pub vars: Option<Field<BTreeMap<String, Field<String>>>>,
    pub proxy_http: Option<Field<ProxyHttpInput>>,
    #[serde(default, deserialize_with = "present")]
    pub micro_gateway_id: Option<Option<Field<String>>>,
}

impl StageInput {
    /// The requested micro gateway, if one was sent and parses as a UUID.
    fn requested_micro_gateway(&self) -> Option<Uuid> {
        let raw = self.micro_gateway_id.as_ref()?.typed(ValueKind::String).ok()??;
        Uuid::parse_str(raw).ok()
    }
}

/// Same presence rules as [`StageInput`] for the optional columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStage {
    pub name: String,
    pub description: Option<Option<String>>,
    pub description_en: Option<Option<String>>,
    pub vars: BTreeMap<String, String>,
    pub proxy_http: ProxyHttpConfig,
    pub micro_gateway_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Copy)]
pub struct StageValidator {
    pub name_validator: NameValidator,
    pub vars_validator: StageVarsValidator,
    pub count_validator: MaxCountPerGatewayValidator,
}

impl StageValidator {
    pub fn new(max_stage_count: i64) -> Self {
        Self {
            name_validator: NameValidator,
            vars_validator: StageVarsValidator,
            count_validator: MaxCountPerGatewayValidator::new(max_stage_count),
        }
    }

    /// Field rules that need no database access.
    pub fn validate_fields(&self, input: &StageInput) -> std::result::Result<ValidatedStage, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = match input.name.typed(ValueKind::String).map(|name| name.map(String::as_str)) {
            Err(message) => {
                errors.add("name", message);
                None
            }
            Ok(None) => {
                errors.add("name", ErrorMessage::Required);
                None
            }
            Ok(Some(name)) if !STAGE_NAME_PATTERN.is_match(name) => {
                errors.add("name", ErrorMessage::InvalidStageName);
                None
            }
            Ok(Some(name)) => match self.name_validator.validate(name) {
                Ok(()) => Some(name.to_string()),
                Err(message) => {
                    errors.add("name", message);
                    None
                }
            },
        };

        let description = validate_description(&mut errors, "description", &input.description);
        let description_en = validate_description(&mut errors, "description_en", &input.description_en);

        // Omitted vars reset the stage to no variables
        let mut vars = BTreeMap::new();
        match input.vars.typed(ValueKind::Object) {
            Err(message) => errors.add("vars", message),
            Ok(None) => {}
            Ok(Some(raw)) => {
                for (key, value) in raw {
                    match value.typed(ValueKind::String) {
                        Err(message) => errors.add(format!("vars.{}", key), message),
                        Ok(value) => {
                            vars.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
        }
        for message in self.vars_validator.validate(&vars) {
            errors.add("vars", message);
        }

        let proxy_http = match input.proxy_http.typed(ValueKind::Object) {
            Err(message) => {
                errors.add("proxy_http", message);
                None
            }
            Ok(proxy_http) => errors.collect("proxy_http", ProxyHttpValidator.validate(proxy_http)),
        };

        let micro_gateway_id = match &input.micro_gateway_id {
            None => None,
            Some(raw) => match raw.typed(ValueKind::String) {
                Err(message) => {
                    errors.add("micro_gateway_id", message);
                    None
                }
                Ok(None) => Some(None),
                Ok(Some(raw)) => match Uuid::parse_str(raw) {
                    Ok(id) => Some(Some(id)),
                    Err(_) => {
                        errors.add("micro_gateway_id", ErrorMessage::InvalidUuid);
                        None
                    }
                },
            },
        };

        match (name, proxy_http) {
            (Some(name), Some(proxy_http)) if errors.is_empty() => Ok(ValidatedStage {
                name,
                description,
                description_en,
                vars,
                proxy_http,
                micro_gateway_id,
            }),
            _ => Err(errors),
        }
    }

    /// Full validation against the caller's gateway. `instance` is the stage
    /// being updated, `None` on create.
    pub async fn validate(
        &self,
        pool: &SqlitePool,
        gateway_id: i64,
        input: &StageInput,
        instance: Option<&Stage>,
    ) -> Result<ValidatedStage> {
        let (validated, mut field_errors) = match self.validate_fields(input) {
            Ok(validated) => (Some(validated), ValidationErrors::new()),
            Err(errors) => (None, errors),
        };

        // The micro gateway must live in the caller's gateway
        if let Some(id) = input.requested_micro_gateway() {
            if !stores::micro_gateway_exists(pool, gateway_id, id).await? {
                field_errors.add("micro_gateway_id", ErrorMessage::MicroGatewayNotFound(id.to_string()));
            }
        }

        let validated = match validated {
            Some(validated) if field_errors.is_empty() => validated,
            _ => return Err(field_errors.into()),
        };

        let exclude_id = instance.map(|stage| stage.id);
        let mut errors = ValidationErrors::new();

        if stores::stage_name_exists(pool, gateway_id, &validated.name, exclude_id).await? {
            errors.add(NON_FIELD_ERRORS, ErrorMessage::StageNameExists);
        }

        if instance.is_none() {
            if let Err(message) = self.count_validator.validate(pool, gateway_id).await? {
                errors.add(NON_FIELD_ERRORS, message);
            }
        }

        if let Some(Some(micro_gateway_id)) = validated.micro_gateway_id {
            if stores::micro_gateway_bound_elsewhere(pool, micro_gateway_id, exclude_id).await? {
                errors.add(NON_FIELD_ERRORS, ErrorMessage::MicroGatewayBound);
            }
        }

        Ok(errors.into_result(validated)?)
    }
}

/// `None` when omitted, `Some(None)` for an explicit `null`.
fn validate_description(
    errors: &mut ValidationErrors,
    field: &str,
    input: &Option<Option<Field<String>>>,
) -> Option<Option<String>> {
    let value = match input.as_ref()?.typed(ValueKind::String) {
        Err(message) => {
            errors.add(field, message);
            return None;
        }
        Ok(value) => value,
    };
    if value.is_some_and(|v| v.chars().count() > MAX_STAGE_DESCRIPTION_LENGTH) {
        errors.add(
            field,
            ErrorMessage::DescriptionTooLong {
                max_len: MAX_STAGE_DESCRIPTION_LENGTH,
            },
        );
        return None;
    }
    Some(value.cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::error::StageError;

    fn input(name: &str) -> StageInput {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "vars": {"domain": "example.com", "blank": ""},
            "proxy_http": {
                "timeout": 30,
                "upstreams": {"loadbalance": "RR", "hosts": [{"host": "http://10.0.0.1"}]},
            },
        }))
        .unwrap()
    }

    fn validation_errors(err: StageError) -> ValidationErrors {
        match err {
            StageError::Validation(errors) => errors,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_fields_ok() {
        let validated = StageValidator::new(10).validate_fields(&input("prod")).unwrap();
        assert_eq!(validated.name, "prod");
        assert_eq!(validated.vars["blank"], "");
        assert_eq!(validated.proxy_http.timeout, 30);
        assert!(validated.proxy_http.transform_headers.is_empty());
    }

    #[test]
    fn test_validate_fields_collects_everything() {
        let raw: StageInput = serde_json::from_value(serde_json::json!({
            "name": "1-bad",
            "vars": {"9x": "v"},
            "micro_gateway_id": "not-a-uuid",
            "proxy_http": {"upstreams": {"loadbalance": "RR", "hosts": [{"host": "10.0.0.1"}]}},
        }))
        .unwrap();

        let errors = StageValidator::new(10).validate_fields(&raw).unwrap_err();
        let fields: Vec<&str> = errors.fields().collect();
        assert_eq!(
            fields,
            vec![
                "micro_gateway_id",
                "name",
                "proxy_http.timeout",
                "proxy_http.upstreams.hosts[0].host",
                "vars",
            ]
        );
    }

    #[test]
    fn test_missing_proxy_http_is_required() {
        let raw = StageInput {
            name: Some("prod".to_string().into()),
            ..Default::default()
        };
        let errors = StageValidator::new(10).validate_fields(&raw).unwrap_err();
        assert_eq!(errors.get("proxy_http"), Some(&[ErrorMessage::Required][..]));
    }

    #[test]
    fn test_omitted_and_null_are_distinct() {
        let omitted = StageValidator::new(10).validate_fields(&input("prod")).unwrap();
        assert_eq!(omitted.description, None);
        assert_eq!(omitted.micro_gateway_id, None);

        let mut raw = input("prod");
        raw.description = Some(None);
        raw.description_en = Some(Some("Production".to_string().into()));
        raw.micro_gateway_id = Some(None);
        let explicit = StageValidator::new(10).validate_fields(&raw).unwrap();
        assert_eq!(explicit.description, Some(None));
        assert_eq!(explicit.description_en, Some(Some("Production".to_string())));
        assert_eq!(explicit.micro_gateway_id, Some(None));
    }

    #[test]
    fn test_wrongly_typed_fields_reported_per_field() {
        let raw: StageInput = serde_json::from_value(serde_json::json!({
            "name": 42,
            "description": ["a"],
            "vars": {"domain": "example.com", "port": 8080},
            "micro_gateway_id": 7,
            "proxy_http": {
                "timeout": "30",
                "upstreams": {"loadbalance": "RR", "hosts": [{"host": "http://10.0.0.1"}]},
            },
        }))
        .unwrap();

        let errors = StageValidator::new(10).validate_fields(&raw).unwrap_err();
        let string = Some(&[ErrorMessage::InvalidType(ValueKind::String)][..]);
        assert_eq!(errors.get("name"), string);
        assert_eq!(errors.get("description"), string);
        assert_eq!(errors.get("vars.port"), string);
        assert_eq!(errors.get("micro_gateway_id"), string);
        assert_eq!(
            errors.get("proxy_http.timeout"),
            Some(&[ErrorMessage::InvalidType(ValueKind::Integer)][..])
        );
        assert!(!errors.contains("vars"));
        assert!(!errors.contains(NON_FIELD_ERRORS));
    }

    #[test]
    fn test_proxy_http_of_wrong_type() {
        let raw: StageInput =
            serde_json::from_value(serde_json::json!({"name": "prod", "proxy_http": "http://10.0.0.1"})).unwrap();
        let errors = StageValidator::new(10).validate_fields(&raw).unwrap_err();
        assert_eq!(
            errors.get("proxy_http"),
            Some(&[ErrorMessage::InvalidType(ValueKind::Object)][..])
        );
    }

    #[tokio::test]
    async fn test_unknown_micro_gateway_reports_id() {
        let db = Database::in_memory().await.unwrap();
        let gateway_id = stores::create_gateway(db.pool(), "demo").await.unwrap();
        let other_gateway = stores::create_gateway(db.pool(), "other").await.unwrap();
        let id = Uuid::now_v7();
        // Exists, but under another gateway
        stores::create_micro_gateway(db.pool(), other_gateway, id, "mgw").await.unwrap();

        let mut raw = input("prod");
        raw.micro_gateway_id = Some(Some(id.to_string().into()));

        let err = StageValidator::new(10)
            .validate(db.pool(), gateway_id, &raw, None)
            .await
            .unwrap_err();
        let errors = validation_errors(err);
        assert_eq!(
            errors.get("micro_gateway_id"),
            Some(&[ErrorMessage::MicroGatewayNotFound(id.to_string())][..])
        );
    }
}
