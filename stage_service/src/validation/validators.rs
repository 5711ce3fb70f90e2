//! Pluggable rule sets for stage names, stage variables and the per-gateway
//! stage quota.

use std::collections::BTreeMap;

use sqlx::SqliteExecutor;

use crate::constants::{
    MAX_STAGE_VAR_VALUE_LENGTH, MAX_STAGE_VARS_COUNT, RESERVED_STAGE_NAMES, STAGE_VAR_NAME_PATTERN,
};
use crate::database::DatabaseError;
use crate::i18n::ErrorMessage;
use crate::stores;

/// Rules applied after the stage name already matched `STAGE_NAME_PATTERN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameValidator;

impl NameValidator {
    pub fn validate(&self, name: &str) -> Result<(), ErrorMessage> {
        let lowered = name.to_ascii_lowercase();
        if RESERVED_STAGE_NAMES.contains(&lowered.as_str()) {
            return Err(ErrorMessage::ReservedStageName(name.to_string()));
        }
        if name.ends_with('-') || name.ends_with('_') {
            return Err(ErrorMessage::StageNameTrailingSeparator);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageVarsValidator;

impl StageVarsValidator {
    /// Every problem found, in key order. Blank values are allowed.
    pub fn validate(&self, vars: &BTreeMap<String, String>) -> Vec<ErrorMessage> {
        let mut errors = Vec::new();

        if vars.len() > MAX_STAGE_VARS_COUNT {
            errors.push(ErrorMessage::TooManyVars {
                max_count: MAX_STAGE_VARS_COUNT,
            });
        }

        for (name, value) in vars {
            if !STAGE_VAR_NAME_PATTERN.is_match(name) {
                errors.push(ErrorMessage::InvalidVarName(name.clone()));
            } else if value.len() > MAX_STAGE_VAR_VALUE_LENGTH {
                errors.push(ErrorMessage::VarValueTooLong {
                    name: name.clone(),
                    max_len: MAX_STAGE_VAR_VALUE_LENGTH,
                });
            }
        }

        errors
    }
}

/// Only consulted when creating; an update never changes the count.
#[derive(Debug, Clone, Copy)]
pub struct MaxCountPerGatewayValidator {
    pub max_count: i64,
}

impl MaxCountPerGatewayValidator {
    pub fn new(max_count: i64) -> Self {
        Self { max_count }
    }

    pub async fn validate<'e>(
        &self,
        executor: impl SqliteExecutor<'e>,
        gateway_id: i64,
    ) -> Result<Result<(), ErrorMessage>, DatabaseError> {
        let count = stores::count_stages(executor, gateway_id).await?;
        if count >= self.max_count {
            return Ok(Err(ErrorMessage::StageCountExceeded {
                max_count: self.max_count,
            }));
        }
        Ok(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn test_name_validator() {
        assert!(NameValidator.validate("prod").is_ok());
        assert!(NameValidator.validate("pre-prod_2").is_ok());
        assert_eq!(
            NameValidator.validate("Global"),
            Err(ErrorMessage::ReservedStageName("Global".to_string()))
        );
        assert_eq!(
            NameValidator.validate("prod-"),
            Err(ErrorMessage::StageNameTrailingSeparator)
        );
    }

    #[test]
    fn test_stage_vars_validator() {
        let mut vars = BTreeMap::new();
        vars.insert("domain".to_string(), "example.com".to_string());
        vars.insert("empty".to_string(), String::new());
        assert!(StageVarsValidator.validate(&vars).is_empty());

        vars.insert("1bad".to_string(), "x".to_string());
        vars.insert("big".to_string(), "x".repeat(MAX_STAGE_VAR_VALUE_LENGTH + 1));
        let errors = StageVarsValidator.validate(&vars);
        assert_eq!(
            errors,
            vec![
                ErrorMessage::InvalidVarName("1bad".to_string()),
                ErrorMessage::VarValueTooLong {
                    name: "big".to_string(),
                    max_len: MAX_STAGE_VAR_VALUE_LENGTH
                },
            ]
        );
    }

    #[test]
    fn test_stage_vars_count_limit() {
        let vars: BTreeMap<String, String> = (0..=MAX_STAGE_VARS_COUNT)
            .map(|i| (format!("v{}", i), String::new()))
            .collect();
        let errors = StageVarsValidator.validate(&vars);
        assert_eq!(
            errors,
            vec![ErrorMessage::TooManyVars {
                max_count: MAX_STAGE_VARS_COUNT
            }]
        );
    }

    #[tokio::test]
    async fn test_max_count_validator() {
        let db = Database::in_memory().await.unwrap();
        let gateway_id = stores::create_gateway(db.pool(), "demo").await.unwrap();
        let validator = MaxCountPerGatewayValidator::new(1);

        assert_eq!(validator.validate(db.pool(), gateway_id).await.unwrap(), Ok(()));

        sqlx::query("INSERT INTO stages (gateway_id, name) VALUES (?, 'prod')")
            .bind(gateway_id)
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(
            validator.validate(db.pool(), gateway_id).await.unwrap(),
            Err(ErrorMessage::StageCountExceeded { max_count: 1 })
        );
    }
}
