//! Stage API Handlers
//!
//! - `GET /stages` - List stages of the caller's gateway
//! - `POST /stages` - Create a stage
//! - `GET /stages/with-resource-version` - Stages with their released version
//! - `GET /stages/{id}` - Stage details including `proxy_http`
//! - `PUT /stages/{id}` - Update a stage
//!
//! The caller's gateway comes from `X-Gateway-Id`, the acting user from
//! `X-Username` and the message language from `Accept-Language`.

use std::collections::BTreeMap;

use axum::{
    extract::{FromRequestParts, Path, State, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::constants::StageStatus;
use crate::context::RequestContext;
use crate::database::Database;
use crate::error::StageError;
use crate::i18n::{ErrorMessage, Lang};
use crate::models::Stage;
use crate::stores;
use crate::validation::{NON_FIELD_ERRORS, ProxyHttpConfig, StageInput, ValidationErrors};
use crate::writer::StageConfigWriter;

pub const GATEWAY_HEADER: &str = "x-gateway-id";
pub const USERNAME_HEADER: &str = "x-username";
const DEFAULT_USERNAME: &str = "admin";

#[derive(Clone)]
pub struct AppState {
    writer: StageConfigWriter,
    default_lang: Lang,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            writer: StageConfigWriter::new(db, config),
            default_lang: config.default_language,
        }
    }

    fn db(&self) -> &Database {
        self.writer.database()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A [`StageError`] rendered in the caller's language.
#[derive(Debug)]
pub struct ApiError {
    error: StageError,
    lang: Lang,
}

impl ApiError {
    pub fn new(error: StageError, lang: Lang) -> Self {
        Self { error, lang }
    }

    fn invalid_body(rejection: JsonRejection, lang: Lang) -> Self {
        let errors = ValidationErrors::single(NON_FIELD_ERRORS, ErrorMessage::InvalidBody(rejection.body_text()));
        Self::new(errors.into(), lang)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.error {
            StageError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "errors": errors.render(self.lang) })),
            )
                .into_response(),
            StageError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("Not found: {}", what) })),
            )
                .into_response(),
            other => {
                error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

// ============================================================================
// Request context
// ============================================================================

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

        let lang = header(axum::http::header::ACCEPT_LANGUAGE.as_str())
            .and_then(Lang::from_accept_language)
            .unwrap_or(state.default_lang);

        let gateway_id = header(GATEWAY_HEADER)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| ApiError::new(StageError::NotFound("gateway".to_string()), lang))?;

        let gateway = stores::get_gateway(state.db().pool(), gateway_id)
            .await
            .map_err(|e| ApiError::new(e.into(), lang))?
            .ok_or_else(|| ApiError::new(StageError::NotFound(format!("gateway {}", gateway_id)), lang))?;

        let username = header(USERNAME_HEADER)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_USERNAME);

        Ok(RequestContext::new(gateway.id, username).with_lang(lang))
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StageResponse {
    id: i64,
    name: String,
    description: Option<String>,
    description_en: Option<String>,
    vars: BTreeMap<String, String>,
    status: StageStatus,
    micro_gateway_id: Option<Uuid>,
    proxy_http: Option<ProxyHttpConfig>,
    created_by: String,
    updated_by: String,
    created_at: String,
    updated_at: String,
}

impl StageResponse {
    fn new(stage: Stage, proxy_http: Option<ProxyHttpConfig>, lang: Lang) -> Self {
        Self {
            id: stage.id,
            description: stage.localized_description(lang).map(str::to_string),
            name: stage.name,
            description_en: stage.description_en,
            vars: stage.vars,
            status: stage.status,
            micro_gateway_id: stage.micro_gateway_id,
            proxy_http,
            created_by: stage.created_by,
            updated_by: stage.updated_by,
            created_at: stage.created_at,
            updated_at: stage.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct StageSummary {
    id: i64,
    name: String,
    description: Option<String>,
    status: StageStatus,
}

#[derive(Debug, Serialize)]
struct StagesListResponse {
    stages: Vec<StageSummary>,
    total: usize,
}

#[derive(Debug, Serialize)]
struct ResourceVersion {
    version: String,
}

#[derive(Debug, Serialize)]
struct StageResourceVersion {
    id: i64,
    name: String,
    resource_version: Option<ResourceVersion>,
    released: bool,
}

async fn stage_response(state: &AppState, stage: Stage, lang: Lang) -> Result<StageResponse, ApiError> {
    let proxy_http = state
        .writer
        .proxy_http(&stage)
        .await
        .map_err(|e| ApiError::new(e, lang))?;
    Ok(StageResponse::new(stage, proxy_http, lang))
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_stages(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<StagesListResponse>, ApiError> {
    let stages = stores::list_stages(state.db().pool(), ctx.gateway_id)
        .await
        .map_err(|e| ApiError::new(e.into(), ctx.lang))?;

    let stages: Vec<StageSummary> = stages
        .into_iter()
        .map(|stage| StageSummary {
            id: stage.id,
            description: stage.localized_description(ctx.lang).map(str::to_string),
            name: stage.name,
            status: stage.status,
        })
        .collect();

    Ok(Json(StagesListResponse {
        total: stages.len(),
        stages,
    }))
}

async fn list_stages_with_resource_version(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<StageResourceVersion>>, ApiError> {
    let rows = stores::list_stages_with_release(state.db().pool(), ctx.gateway_id)
        .await
        .map_err(|e| ApiError::new(e.into(), ctx.lang))?;

    let stages = rows
        .into_iter()
        .map(|row| StageResourceVersion {
            id: row.id,
            name: row.name,
            released: row.resource_version.is_some(),
            resource_version: row.resource_version.map(|version| ResourceVersion { version }),
        })
        .collect();

    Ok(Json(stages))
}

async fn get_stage(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> Result<Json<StageResponse>, ApiError> {
    let stage = stores::get_stage(state.db().pool(), ctx.gateway_id, id)
        .await
        .map_err(|e| ApiError::new(e.into(), ctx.lang))?
        .ok_or_else(|| ApiError::new(StageError::NotFound(format!("stage {}", id)), ctx.lang))?;

    Ok(Json(stage_response(&state, stage, ctx.lang).await?))
}

async fn create_stage(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<StageInput>, JsonRejection>,
) -> Result<(StatusCode, Json<StageResponse>), ApiError> {
    let Json(input) = body.map_err(|rejection| ApiError::invalid_body(rejection, ctx.lang))?;
    info!(gateway_id = ctx.gateway_id, username = ctx.username.as_str(), "Stage create request received");

    let stage = state
        .writer
        .create(&ctx, &input)
        .await
        .map_err(|e| ApiError::new(e, ctx.lang))?;

    Ok((StatusCode::CREATED, Json(stage_response(&state, stage, ctx.lang).await?)))
}

async fn update_stage(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
    body: Result<Json<StageInput>, JsonRejection>,
) -> Result<Json<StageResponse>, ApiError> {
    let Json(input) = body.map_err(|rejection| ApiError::invalid_body(rejection, ctx.lang))?;
    info!(
        gateway_id = ctx.gateway_id,
        stage_id = id,
        username = ctx.username.as_str(),
        "Stage update request received"
    );

    let stage = state
        .writer
        .update(&ctx, id, &input)
        .await
        .map_err(|e| ApiError::new(e, ctx.lang))?;

    Ok(Json(stage_response(&state, stage, ctx.lang).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stages", get(list_stages).post(create_stage))
        .route("/stages/with-resource-version", get(list_stages_with_resource_version))
        .route("/stages/{id}", get(get_stage).put(update_stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseError;

    #[test]
    fn test_api_error_status() {
        let validation = ApiError::new(ValidationErrors::single("name", ErrorMessage::Required).into(), Lang::En);
        assert_eq!(validation.into_response().status(), StatusCode::BAD_REQUEST);

        let missing = ApiError::new(StageError::NotFound("stage 1".to_string()), Lang::En);
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let fault = ApiError::new(DatabaseError::InvalidData("bad".to_string()).into(), Lang::En);
        assert_eq!(fault.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_stage_response_localizes_description() {
        let stage = Stage {
            id: 1,
            gateway_id: 1,
            name: "prod".to_string(),
            description: Some("生产环境".to_string()),
            description_en: Some("Production".to_string()),
            vars: BTreeMap::new(),
            status: StageStatus::Draft,
            micro_gateway_id: None,
            created_by: "admin".to_string(),
            updated_by: "admin".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        };

        let response = StageResponse::new(stage, None, Lang::En);
        assert_eq!(response.description.as_deref(), Some("Production"));
        assert_eq!(response.name, "prod");
    }
}
