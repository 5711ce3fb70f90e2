//! Stage Config Writer
//!
//! Validates a stage definition and persists it together with its derived
//! artifacts: the default backend config, the placeholder configs of every
//! other backend (create only) and the stage-scoped header rewrite plugin.
//!
//! All writes of one invocation share a single transaction. Validation runs
//! on the pool before the transaction is opened.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::constants::{DEFAULT_BACKEND_NAME, PluginBindingScope};
use crate::context::RequestContext;
use crate::database::{Database, DatabaseError};
use crate::error::{Result, StageError};
use crate::i18n::ErrorMessage;
use crate::models::{BackendConfigValue, Stage};
use crate::plugin::HeaderRewriteConvertor;
use crate::stores::{self, StageChanges};
use crate::validation::{
    NON_FIELD_ERRORS, ProxyHttpConfig, StageInput, StageValidator, ValidatedStage, ValidationErrors,
};

#[derive(Clone)]
pub struct StageConfigWriter {
    db: Database,
    validator: StageValidator,
}

impl StageConfigWriter {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            validator: StageValidator::new(config.max_stage_count_per_gateway),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn create(&self, ctx: &RequestContext, input: &StageInput) -> Result<Stage> {
        let validated = self
            .validator
            .validate(self.db.pool(), ctx.gateway_id, input, None)
            .await
            .inspect_err(|e| log_rejected(ctx, None, e))?;

        let mut tx = self.db.begin().await?;

        let changes = changes_of(&validated);
        let stage_id = stores::insert_stage(&mut *tx, ctx.gateway_id, &validated.name, &changes, &ctx.username)
            .await
            .map_err(conflict_as_validation)?;

        let default_backend = stores::get_or_create_backend(&mut tx, ctx.gateway_id, DEFAULT_BACKEND_NAME).await?;
        let config = BackendConfigValue::from_proxy_http(&validated.proxy_http);
        stores::insert_backend_config(&mut *tx, ctx.gateway_id, default_backend.id, stage_id, &config).await?;

        let other_backends: Vec<i64> = stores::list_backends_excluding(&mut *tx, ctx.gateway_id, DEFAULT_BACKEND_NAME)
            .await?
            .iter()
            .map(|backend| backend.id)
            .collect();
        stores::bulk_insert_backend_configs(
            &mut *tx,
            ctx.gateway_id,
            stage_id,
            &other_backends,
            &BackendConfigValue::placeholder(),
        )
        .await?;

        sync_header_rewrite(&mut tx, ctx, stage_id, &validated.proxy_http).await?;

        let stage = stores::get_stage(&mut *tx, ctx.gateway_id, stage_id)
            .await?
            .ok_or_else(|| StageError::NotFound(format!("stage {}", stage_id)))?;
        tx.commit().await?;

        info!(
            gateway_id = ctx.gateway_id,
            stage_id,
            stage = stage.name.as_str(),
            username = ctx.username.as_str(),
            placeholder_backends = other_backends.len(),
            "Stage created"
        );
        Ok(stage)
    }

    /// `name`, `status` and `created_by` of the stored stage are kept whatever
    /// the input says. A missing `name` falls back to the stored one. Omitted
    /// descriptions and `micro_gateway_id` keep their stored values, `null`
    /// clears them. Omitted `vars` resets them to empty.
    pub async fn update(&self, ctx: &RequestContext, stage_id: i64, input: &StageInput) -> Result<Stage> {
        let instance = stores::get_stage(self.db.pool(), ctx.gateway_id, stage_id)
            .await?
            .ok_or_else(|| StageError::NotFound(format!("stage {}", stage_id)))?;

        let input = match input.name {
            Some(_) => input.clone(),
            None => StageInput {
                name: Some(instance.name.clone().into()),
                ..input.clone()
            },
        };

        let validated = self
            .validator
            .validate(self.db.pool(), ctx.gateway_id, &input, Some(&instance))
            .await
            .inspect_err(|e| log_rejected(ctx, Some(stage_id), e))?;

        let mut tx = self.db.begin().await?;

        stores::update_stage(&mut *tx, stage_id, &changes_of(&validated), &ctx.username)
            .await
            .map_err(conflict_as_validation)?;

        let default_backend = stores::get_or_create_backend(&mut tx, ctx.gateway_id, DEFAULT_BACKEND_NAME).await?;
        let config = BackendConfigValue::from_proxy_http(&validated.proxy_http);
        match stores::find_backend_config(&mut *tx, ctx.gateway_id, default_backend.id, stage_id).await? {
            Some(existing) => stores::update_backend_config(&mut *tx, existing.id, &config).await?,
            None => {
                stores::insert_backend_config(&mut *tx, ctx.gateway_id, default_backend.id, stage_id, &config)
                    .await?;
            }
        }

        sync_header_rewrite(&mut tx, ctx, stage_id, &validated.proxy_http).await?;

        let stage = stores::get_stage(&mut *tx, ctx.gateway_id, stage_id)
            .await?
            .ok_or_else(|| StageError::NotFound(format!("stage {}", stage_id)))?;
        tx.commit().await?;

        info!(
            gateway_id = ctx.gateway_id,
            stage_id,
            stage = stage.name.as_str(),
            username = ctx.username.as_str(),
            "Stage updated"
        );
        Ok(stage)
    }

    /// Rebuild the `proxy_http` block of a stage from its default backend
    /// config and header rewrite binding. `None` when the stage has no
    /// default backend config yet.
    pub async fn proxy_http(&self, stage: &Stage) -> Result<Option<ProxyHttpConfig>> {
        let pool = self.db.pool();
        let Some(backend) = stores::get_backend_by_name(pool, stage.gateway_id, DEFAULT_BACKEND_NAME).await? else {
            return Ok(None);
        };
        let Some(backend_config) = stores::find_backend_config(pool, stage.gateway_id, backend.id, stage.id).await?
        else {
            return Ok(None);
        };

        let transform_headers =
            HeaderRewriteConvertor::get_scope_config(pool, stage.gateway_id, PluginBindingScope::Stage, stage.id)
                .await?
                .map(|config| HeaderRewriteConvertor::plugin_config_to_transform_headers(&config))
                .unwrap_or_default();

        Ok(Some(ProxyHttpConfig {
            timeout: backend_config.config.timeout,
            upstreams: backend_config.config.upstreams(),
            transform_headers,
        }))
    }
}

fn changes_of(validated: &ValidatedStage) -> StageChanges<'_> {
    StageChanges {
        description: validated.description.as_ref().map(Option::as_deref),
        description_en: validated.description_en.as_ref().map(Option::as_deref),
        vars: &validated.vars,
        micro_gateway_id: validated.micro_gateway_id,
    }
}

async fn sync_header_rewrite(
    conn: &mut sqlx::SqliteConnection,
    ctx: &RequestContext,
    stage_id: i64,
    proxy_http: &ProxyHttpConfig,
) -> Result<()> {
    let plugin_config = HeaderRewriteConvertor::transform_headers_to_plugin_config(&proxy_http.transform_headers);
    HeaderRewriteConvertor::sync_plugins(
        conn,
        ctx.gateway_id,
        PluginBindingScope::Stage,
        &BTreeMap::from([(stage_id, plugin_config)]),
        &ctx.username,
    )
    .await
}

/// A concurrent writer can slip past the pre-checks; the UNIQUE constraints
/// catch it and the caller sees the same error the pre-check would give.
fn conflict_as_validation(err: DatabaseError) -> StageError {
    if !err.is_unique_violation() {
        return err.into();
    }

    let message = match err.constraint_message() {
        Some(constraint) if constraint.contains("micro_gateway_id") => ErrorMessage::MicroGatewayBound,
        _ => ErrorMessage::StageNameExists,
    };
    ValidationErrors::single(NON_FIELD_ERRORS, message).into()
}

fn log_rejected(ctx: &RequestContext, stage_id: Option<i64>, err: &StageError) {
    match err {
        StageError::Validation(errors) => warn!(
            gateway_id = ctx.gateway_id,
            ?stage_id,
            username = ctx.username.as_str(),
            errors = %errors,
            "Stage rejected"
        ),
        other => error!(gateway_id = ctx.gateway_id, ?stage_id, error = %other, "Stage validation failed"),
    }
}
